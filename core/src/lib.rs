//! Async client core for FileMaker Server's Data API and OData API.
//!
//! # Overview
//! Both protocols share one pipeline: a request builder that percent-encodes
//! the URL and attaches `Authorization` and `Content-Type`, an executor that
//! sends through a host-supplied [`Transport`] and classifies the status, a
//! decoder that accepts enveloped, bare-array and single-object bodies, and a
//! one-shot re-authentication retry around every logical call.
//!
//! # Design
//! - The crate performs no I/O of its own. Hosts plug in a [`Transport`]
//!   (the `reqwest` feature ships one) and, optionally, a [`TokenProvider`].
//! - [`ProtocolVariant`] selects URL template, auth scheme and envelope
//!   shape; [`ODataClient`] and [`DataApiClient`] are thin call surfaces over
//!   the same [`FileMakerClient`].
//! - Required names are validated before any request is built, so an empty
//!   table name never reaches the network.

pub mod auth;
pub mod client;
pub mod config;
pub mod data_api;
pub mod decode;
pub mod error;
pub mod http;
pub mod odata;
pub mod request;
pub mod types;

pub use auth::{Authenticator, Credentials, TokenProvider};
pub use client::FileMakerClient;
pub use config::{ClientConfig, ProtocolVariant, ProtocolVersion};
pub use data_api::DataApiClient;
pub use decode::decode_records;
pub use error::{ApiError, Result, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use odata::ODataClient;
pub use request::{encode_url, RequestBuilder};
pub use types::{FilterOption, FilterValue, Record, RecordKey, RecordRef, ScriptResult};

#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;
