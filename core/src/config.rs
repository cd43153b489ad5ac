//! Connection configuration: protocol variant, version, and the derived base URI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Which FileMaker REST interface the client speaks.
///
/// The variant fixes the URL template, the authorization scheme, and the
/// response envelope the client expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVariant {
    /// Native Data API: session token obtained from `/sessions`, `Bearer` auth.
    #[serde(rename = "data")]
    DataApi,
    /// OData API: `Basic` auth on every request.
    OData,
}

impl ProtocolVariant {
    pub fn default_version(self) -> ProtocolVersion {
        match self {
            ProtocolVariant::DataApi => ProtocolVersion::Latest,
            ProtocolVariant::OData => ProtocolVersion::V4,
        }
    }

    /// Whether the authorization header is a bearer token fetched from the server.
    pub fn uses_bearer_token(self) -> bool {
        matches!(self, ProtocolVariant::DataApi)
    }
}

/// Version segment of the base URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2")]
    V2,
    #[serde(rename = "v4")]
    V4,
    #[serde(rename = "vLatest")]
    Latest,
}

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "v1",
            ProtocolVersion::V2 => "v2",
            ProtocolVersion::V4 => "v4",
            ProtocolVersion::Latest => "vLatest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "v1" => Some(ProtocolVersion::V1),
            "v2" => Some(ProtocolVersion::V2),
            "v4" => Some(ProtocolVersion::V4),
            "vLatest" | "latest" => Some(ProtocolVersion::Latest),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable connection settings.
///
/// `base_uri` is recomputed by each `with_*` builder step and never changes
/// once the config is handed to a client.
///
/// Deserialization reads only the connection fields and derives `base_uri`
/// from them; a `base_uri` present in the input is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConfigFields")]
pub struct ClientConfig {
    variant: ProtocolVariant,
    hostname: String,
    database: String,
    version: ProtocolVersion,
    scheme: String,
    #[serde(skip_serializing)]
    base_uri: String,
}

/// Serialized form of [`ClientConfig`]. `version` and `scheme` fall back to
/// the variant default and `https`.
#[derive(Deserialize)]
struct ConfigFields {
    variant: ProtocolVariant,
    hostname: String,
    database: String,
    #[serde(default)]
    version: Option<ProtocolVersion>,
    #[serde(default)]
    scheme: Option<String>,
}

impl From<ConfigFields> for ClientConfig {
    fn from(fields: ConfigFields) -> Self {
        let mut config = ClientConfig::new(fields.variant, &fields.hostname, &fields.database);
        if let Some(version) = fields.version {
            config = config.with_version(version);
        }
        if let Some(scheme) = fields.scheme {
            config = config.with_scheme(&scheme);
        }
        config
    }
}

impl ClientConfig {
    pub fn new(variant: ProtocolVariant, hostname: &str, database: &str) -> Self {
        let mut config = Self {
            variant,
            hostname: hostname.trim_end_matches('/').to_string(),
            database: database.to_string(),
            version: variant.default_version(),
            scheme: "https".to_string(),
            base_uri: String::new(),
        };
        config.base_uri = config.derive_base_uri();
        config
    }

    pub fn data_api(hostname: &str, database: &str) -> Self {
        Self::new(ProtocolVariant::DataApi, hostname, database)
    }

    pub fn odata(hostname: &str, database: &str) -> Self {
        Self::new(ProtocolVariant::OData, hostname, database)
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self.base_uri = self.derive_base_uri();
        self
    }

    /// Override the URL scheme (`https` by default). Local servers use `http`.
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self.base_uri = self.derive_base_uri();
        self
    }

    /// Build a config from `FMPRO_HOST`, `FMPRO_DATABASE` and the optional
    /// `FMPRO_PROTOCOL` (`data` | `odata`, default `odata`), `FMPRO_VERSION`,
    /// `FMPRO_SCHEME`.
    pub fn from_env() -> Result<Self> {
        let hostname = require_env("FMPRO_HOST")?;
        let database = require_env("FMPRO_DATABASE")?;
        let variant = match std::env::var("FMPRO_PROTOCOL").as_deref() {
            Ok("data") | Ok("dataapi") => ProtocolVariant::DataApi,
            _ => ProtocolVariant::OData,
        };

        let mut config = Self::new(variant, &hostname, &database);
        if let Some(version) = std::env::var("FMPRO_VERSION")
            .ok()
            .as_deref()
            .and_then(ProtocolVersion::parse)
        {
            config = config.with_version(version);
        }
        if let Ok(scheme) = std::env::var("FMPRO_SCHEME") {
            config = config.with_scheme(&scheme);
        }
        Ok(config)
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    fn derive_base_uri(&self) -> String {
        match self.variant {
            ProtocolVariant::DataApi => format!(
                "{}://{}/fmi/data/{}/databases/{}",
                self.scheme, self.hostname, self.version, self.database
            ),
            ProtocolVariant::OData => format!(
                "{}://{}/fmi/odata/{}/{}",
                self.scheme, self.hostname, self.version, self.database
            ),
        }
    }
}

pub(crate) fn require_env(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::MissingParameter(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_api_base_uri() {
        let config = ClientConfig::data_api("fm.example.com", "Contacts");
        assert_eq!(
            config.base_uri(),
            "https://fm.example.com/fmi/data/vLatest/databases/Contacts"
        );
    }

    #[test]
    fn odata_base_uri() {
        let config = ClientConfig::odata("fm.example.com", "Contacts");
        assert_eq!(config.base_uri(), "https://fm.example.com/fmi/odata/v4/Contacts");
    }

    #[test]
    fn version_and_scheme_rebuild_base_uri() {
        let config = ClientConfig::data_api("127.0.0.1:3000", "Sales")
            .with_version(ProtocolVersion::V2)
            .with_scheme("http");
        assert_eq!(
            config.base_uri(),
            "http://127.0.0.1:3000/fmi/data/v2/databases/Sales"
        );
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let config = ClientConfig::odata("fm.example.com/", "Db");
        assert_eq!(config.base_uri(), "https://fm.example.com/fmi/odata/v4/Db");
    }

    #[test]
    fn variant_serializes_as_short_name() {
        assert_eq!(serde_json::to_value(ProtocolVariant::DataApi).unwrap(), "data");
        assert_eq!(serde_json::to_value(ProtocolVariant::OData).unwrap(), "odata");
        assert_eq!(serde_json::to_value(ProtocolVersion::Latest).unwrap(), "vLatest");
    }

    #[test]
    fn deserialized_config_derives_its_own_base_uri() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "variant": "odata",
            "hostname": "fm.example.com",
            "database": "Db",
            "version": "v4",
            "scheme": "https",
            "base_uri": "http://elsewhere.example/x"
        }))
        .unwrap();
        assert_eq!(config.base_uri(), "https://fm.example.com/fmi/odata/v4/Db");
    }

    #[test]
    fn deserialized_config_uses_defaults() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "variant": "data",
            "hostname": "fm.example.com",
            "database": "Sales"
        }))
        .unwrap();
        assert_eq!(config.version(), ProtocolVersion::Latest);
        assert_eq!(
            config.base_uri(),
            "https://fm.example.com/fmi/data/vLatest/databases/Sales"
        );
    }

    #[test]
    fn config_survives_a_serde_round_trip() {
        let config = ClientConfig::data_api("127.0.0.1:3000", "Sales").with_scheme("http");
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("base_uri").is_none());
        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn version_parse() {
        assert_eq!(ProtocolVersion::parse("v4"), Some(ProtocolVersion::V4));
        assert_eq!(ProtocolVersion::parse("latest"), Some(ProtocolVersion::Latest));
        assert_eq!(ProtocolVersion::parse("v9"), None);
    }
}
