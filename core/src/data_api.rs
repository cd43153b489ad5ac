//! Data API call surface: sessions, layout records, and `_find`.
//!
//! Paths are relative to `{scheme}://{host}/fmi/data/{version}/databases/{database}`.
//! Response bodies arrive wrapped as `{"response": {...}, "messages": [...]}`;
//! record lists live under `response.data` and go through the shape-tolerant
//! decoder.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{Credentials, TokenProvider};
use crate::client::{require_param, FileMakerClient};
use crate::config::{ClientConfig, ProtocolVariant};
use crate::decode::{decode_one, decode_records_value, decoding_error};
use crate::error::{check_status, ApiError, Result};
use crate::http::{HttpMethod, Transport};
use crate::types::{Record, RecordRef};

/// FileMaker message code for "No records match the request".
const NO_RECORDS_MATCH: &str = "401";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    response: Value,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldData<'a, R: ?Sized> {
    field_data: &'a R,
}

#[derive(Serialize)]
struct FindRequest<'a, Q: ?Sized> {
    query: [&'a Q; 1],
}

/// Client for FileMaker's Data API (session token, bearer auth).
pub struct DataApiClient<T> {
    core: FileMakerClient<T>,
}

impl<T: Transport> DataApiClient<T> {
    pub fn new(hostname: &str, database: &str, credentials: Credentials, transport: T) -> Self {
        Self {
            core: FileMakerClient::new(ClientConfig::data_api(hostname, database), credentials, transport),
        }
    }

    /// Fails when `config` was built for OData.
    pub fn from_config(config: ClientConfig, credentials: Credentials, transport: T) -> Result<Self> {
        if config.variant() != ProtocolVariant::DataApi {
            return Err(ApiError::InvalidUrl {
                url: config.base_uri().to_string(),
                reason: "configuration targets OData, not the Data API".to_string(),
            });
        }
        Ok(Self {
            core: FileMakerClient::new(config, credentials, transport),
        })
    }

    /// Use `provider` instead of the `/sessions` login to obtain tokens.
    pub fn with_token_provider(self, provider: impl TokenProvider + 'static) -> Self {
        Self {
            core: self.core.with_token_provider(provider),
        }
    }

    pub fn core(&self) -> &FileMakerClient<T> {
        &self.core
    }

    /// Fetch a session token now instead of on the first `401`.
    pub async fn login(&self) -> Result<()> {
        self.core.refresh_token().await
    }

    /// End the current session. Does nothing when no token is held.
    pub async fn logout(&self) -> Result<()> {
        let Some(token) = self.core.bearer_token() else {
            debug!("no data api session to close");
            return Ok(());
        };
        let request = self
            .core
            .build_request(&format!("/sessions/{token}"), HttpMethod::Delete)?;
        self.core.clear_token();
        self.core.execute(request).await?;
        info!("data api session closed");
        Ok(())
    }

    /// Create a record on `layout`; returns the new record id.
    pub async fn create_record<R: Serialize + ?Sized>(&self, layout: &str, record: &R) -> Result<RecordRef> {
        require_param(layout, "table")?;
        let path = format!("/layouts/{layout}/records");
        self.send_field_data(HttpMethod::Post, &path, record).await
    }

    pub async fn edit_record<R: Serialize + ?Sized>(&self, layout: &str, record_id: u64, record: &R) -> Result<RecordRef> {
        require_param(layout, "table")?;
        let path = format!("/layouts/{layout}/records/{record_id}");
        self.send_field_data(HttpMethod::Patch, &path, record).await
    }

    pub async fn get_records<R: DeserializeOwned>(&self, layout: &str) -> Result<Vec<Record<R>>> {
        require_param(layout, "table")?;
        let path = format!("/layouts/{layout}/records");
        let core = &self.core;
        let path = path.as_str();
        core.with_reauth(move || async move {
            let response = core.call(HttpMethod::Get, path).await?;
            decode_data(&response.body)
        })
        .await
    }

    pub async fn get_record<R: DeserializeOwned>(&self, layout: &str, record_id: u64) -> Result<Vec<Record<R>>> {
        require_param(layout, "table")?;
        let path = format!("/layouts/{layout}/records/{record_id}");
        let core = &self.core;
        let path = path.as_str();
        core.with_reauth(move || async move {
            let response = core.call(HttpMethod::Get, path).await?;
            decode_data(&response.body)
        })
        .await
    }

    /// Delete one record. A missing record is `NotFound`, not success.
    pub async fn delete_record(&self, layout: &str, record_id: u64) -> Result<bool> {
        require_param(layout, "table")?;
        let path = format!("/layouts/{layout}/records/{record_id}");
        let core = &self.core;
        let path = path.as_str();
        core.with_reauth(move || async move {
            core.call(HttpMethod::Delete, path).await?;
            Ok(true)
        })
        .await
    }

    /// Records matching `query` (field name to FileMaker find criterion).
    /// "No records match" yields an empty list.
    pub async fn find_records<Q, R>(&self, layout: &str, query: &Q) -> Result<Vec<Record<R>>>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        require_param(layout, "table")?;
        let core = &self.core;
        core.with_reauth(move || async move { self.find(layout, query).await })
            .await
    }

    pub async fn find_record_ids<Q: Serialize + ?Sized>(&self, layout: &str, query: &Q) -> Result<Vec<u64>> {
        require_param(layout, "table")?;
        let core = &self.core;
        core.with_reauth(move || async move { self.find_ids(layout, query).await })
            .await
    }

    /// Delete every record matching `query`. `true` when all deletions
    /// succeeded, including when nothing matched.
    pub async fn delete_records<Q: Serialize + ?Sized>(&self, layout: &str, query: &Q) -> Result<bool> {
        require_param(layout, "table")?;
        let core = &self.core;
        core.with_reauth(move || async move {
            let ids = self.find_ids(layout, query).await?;
            debug!(layout = %layout, matches = ids.len(), "deleting matched records");
            for id in ids {
                core.call(HttpMethod::Delete, &format!("/layouts/{layout}/records/{id}"))
                    .await?;
            }
            Ok(true)
        })
        .await
    }

    async fn find<Q, R>(&self, layout: &str, query: &Q) -> Result<Vec<Record<R>>>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.core.build_request_with_payload(
            &format!("/layouts/{layout}/_find"),
            HttpMethod::Post,
            &FindRequest { query: [query] },
        )?;
        let response = self.core.dispatch(request).await?;
        if response.status == 500 && message_code(&response.body).as_deref() == Some(NO_RECORDS_MATCH) {
            return Ok(Vec::new());
        }
        check_status(response.status, &response.body)?;
        decode_data(&response.body)
    }

    async fn find_ids<Q: Serialize + ?Sized>(&self, layout: &str, query: &Q) -> Result<Vec<u64>> {
        let records: Vec<Record<Value>> = self.find(layout, query).await?;
        records
            .into_iter()
            .map(|record| {
                record.record_id.parse::<u64>().map_err(|e| ApiError::Decoding {
                    target: "recordId",
                    detail: e.to_string(),
                    body: record.record_id.clone(),
                })
            })
            .collect()
    }

    async fn send_field_data<R: Serialize + ?Sized>(&self, method: HttpMethod, path: &str, record: &R) -> Result<RecordRef> {
        let core = &self.core;
        core.with_reauth(move || async move {
            let response = core
                .call_with(method, path, &FieldData { field_data: record })
                .await?;
            let envelope: Envelope = decode_one(&response.body)?;
            RecordRef::deserialize(&envelope.response)
                .map_err(|e| decoding_error::<RecordRef>(e.to_string(), &response.body))
        })
        .await
    }
}

impl<T> Deref for DataApiClient<T> {
    type Target = FileMakerClient<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

/// Records under `response.data`.
fn decode_data<R: DeserializeOwned>(body: &[u8]) -> Result<Vec<Record<R>>> {
    let envelope: Envelope = decode_one(body)?;
    let data = envelope
        .response
        .get("data")
        .ok_or_else(|| decoding_error::<Record<R>>("missing response.data".to_string(), body))?;
    decode_records_value(data).map_err(|detail| decoding_error::<Record<R>>(detail, body))
}

fn message_code(body: &[u8]) -> Option<String> {
    let envelope: Envelope = serde_json::from_slice(body).ok()?;
    envelope.messages.into_iter().next().map(|message| message.code)
}
