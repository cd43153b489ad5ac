//! OData call surface: entity sets, keyed entities, `$filter` queries, scripts.
//!
//! Paths are relative to `{scheme}://{host}/fmi/odata/{version}/{database}`.
//! Every operation validates its required names before building a request and
//! runs as one logical call under the one-shot re-auth retry.

use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::Credentials;
use crate::client::{require_param, FileMakerClient};
use crate::config::{ClientConfig, ProtocolVariant};
use crate::decode::{decode_one, decode_records};
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, Transport};
use crate::types::{filter_query, FilterOption, FilterValue, RecordKey, ScriptCall, ScriptResponse, ScriptResult};

/// Client for FileMaker's OData API (basic auth on every request).
pub struct ODataClient<T> {
    core: FileMakerClient<T>,
}

impl<T: Transport> ODataClient<T> {
    pub fn new(hostname: &str, database: &str, credentials: Credentials, transport: T) -> Self {
        Self {
            core: FileMakerClient::new(ClientConfig::odata(hostname, database), credentials, transport),
        }
    }

    /// Fails when `config` was built for the Data API.
    pub fn from_config(config: ClientConfig, credentials: Credentials, transport: T) -> Result<Self> {
        if config.variant() != ProtocolVariant::OData {
            return Err(ApiError::InvalidUrl {
                url: config.base_uri().to_string(),
                reason: "configuration targets the Data API, not OData".to_string(),
            });
        }
        Ok(Self {
            core: FileMakerClient::new(config, credentials, transport),
        })
    }

    pub fn core(&self) -> &FileMakerClient<T> {
        &self.core
    }

    /// POST a new record into `table`.
    pub async fn create_record<R>(&self, table: &str, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        require_param(table, "table")?;
        self.send_records(HttpMethod::Post, &format!("/{table}"), record).await
    }

    /// Every record of `table`.
    pub async fn get_table<R: DeserializeOwned>(&self, table: &str) -> Result<Vec<R>> {
        require_param(table, "table")?;
        self.fetch_records(&format!("/{table}")).await
    }

    pub async fn get_record<R: DeserializeOwned>(&self, table: &str, key: impl Into<RecordKey>) -> Result<Vec<R>> {
        require_param(table, "table")?;
        self.fetch_records(&keyed_path(table, &key.into())).await
    }

    /// `query` is appended after `?`, e.g. `$filter=age gt 30&$top=5`.
    pub async fn get_records_by_query<R: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<R>> {
        require_param(table, "table")?;
        self.fetch_records(&format!("/{table}?{query}")).await
    }

    pub async fn get_records<R: DeserializeOwned>(
        &self,
        table: &str,
        field: &str,
        option: FilterOption,
        value: impl Into<FilterValue>,
    ) -> Result<Vec<R>> {
        require_param(table, "table")?;
        require_param(field, "field")?;
        let path = filtered_path(table, field, option, &value.into())?;
        self.fetch_records(&path).await
    }

    pub async fn edit_record<R>(&self, table: &str, key: impl Into<RecordKey>, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        require_param(table, "table")?;
        self.send_records(HttpMethod::Patch, &keyed_path(table, &key.into()), record)
            .await
    }

    pub async fn edit_records_by_query<R>(&self, table: &str, query: &str, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        require_param(table, "table")?;
        self.send_records(HttpMethod::Patch, &format!("/{table}?{query}"), record)
            .await
    }

    pub async fn edit_records<R>(
        &self,
        table: &str,
        field: &str,
        option: FilterOption,
        value: impl Into<FilterValue>,
        record: &R,
    ) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        require_param(table, "table")?;
        require_param(field, "field")?;
        let path = filtered_path(table, field, option, &value.into())?;
        self.send_records(HttpMethod::Patch, &path, record).await
    }

    /// `true` when the server answers with an empty body.
    pub async fn delete_record(&self, table: &str, key: impl Into<RecordKey>) -> Result<bool> {
        require_param(table, "table")?;
        self.remove(&keyed_path(table, &key.into())).await
    }

    pub async fn delete_records_by_query(&self, table: &str, query: &str) -> Result<bool> {
        require_param(table, "table")?;
        self.remove(&format!("/{table}?{query}")).await
    }

    pub async fn delete_records(
        &self,
        table: &str,
        field: &str,
        option: FilterOption,
        value: impl Into<FilterValue>,
    ) -> Result<bool> {
        require_param(table, "table")?;
        require_param(field, "field")?;
        self.remove(&filtered_path(table, field, option, &value.into())?).await
    }

    /// Run `Script.{name}`, passing `parameter` as `scriptParameterValue` when given.
    pub async fn run_script<P>(&self, name: &str, parameter: Option<&P>) -> Result<ScriptResult>
    where
        P: Serialize + ?Sized,
    {
        require_param(name, "script")?;
        let path = format!("/Script.{name}");
        let path = path.as_str();
        let core = &self.core;

        core.with_reauth(move || async move {
            let response = match parameter {
                Some(value) => {
                    let call = ScriptCall {
                        script_parameter_value: value,
                    };
                    core.call_with(HttpMethod::Post, path, &call).await?
                }
                None => core.call(HttpMethod::Post, path).await?,
            };
            let decoded: ScriptResponse = decode_one(&response.body)?;
            Ok(decoded.script_result)
        })
        .await
    }

    /// GET `/{query}`. Decode failures are returned, never replaced by an empty list.
    pub async fn execute_query_get<R: DeserializeOwned>(&self, query: &str) -> Result<Vec<R>> {
        self.fetch_records(&format!("/{query}")).await
    }

    pub async fn execute_query_post<R>(&self, query: &str, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        self.send_records(HttpMethod::Post, &format!("/{query}"), record).await
    }

    pub async fn execute_query_patch<R>(&self, query: &str, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        self.send_records(HttpMethod::Patch, &format!("/{query}"), record).await
    }

    pub async fn execute_query_delete(&self, query: &str) -> Result<bool> {
        self.remove(&format!("/{query}")).await
    }

    async fn fetch_records<R: DeserializeOwned>(&self, path: &str) -> Result<Vec<R>> {
        let core = &self.core;
        core.with_reauth(move || async move {
            let response = core.call(HttpMethod::Get, path).await?;
            decode_records(&response.body)
        })
        .await
    }

    async fn send_records<R>(&self, method: HttpMethod, path: &str, record: &R) -> Result<Vec<R>>
    where
        R: Serialize + DeserializeOwned,
    {
        let core = &self.core;
        core.with_reauth(move || async move {
            let response = core.call_with(method, path, record).await?;
            decode_records(&response.body)
        })
        .await
    }

    async fn remove(&self, path: &str) -> Result<bool> {
        let core = &self.core;
        core.with_reauth(move || async move {
            let response = core.call(HttpMethod::Delete, path).await?;
            Ok(response.body.is_empty())
        })
        .await
    }
}

impl<T> Deref for ODataClient<T> {
    type Target = FileMakerClient<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

fn keyed_path(table: &str, key: &RecordKey) -> String {
    format!("/{table}{}", key.to_path_segment())
}

fn filtered_path(table: &str, field: &str, option: FilterOption, value: &FilterValue) -> Result<String> {
    Ok(format!("/{table}?{}", filter_query(field, option, value)?))
}
