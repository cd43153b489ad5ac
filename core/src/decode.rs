//! Shape-tolerant decoding of response bodies into record lists.
//!
//! # Design
//! The two protocols format lists differently: OData wraps them in an
//! envelope object (`{"@odata.context": ..., "value": [...]}`), other
//! endpoints return a bare array, and single-record endpoints may answer with
//! a bare object. Accepted shapes, tried in order:
//!
//! 1. an object whose only non-annotation field holds an array of `T`
//! 2. an array of `T`
//! 3. a single `T`, yielding a one-element list
//!
//! If none match, decoding fails with [`ApiError::Decoding`]. It never
//! returns an empty list in place of an error.

use serde::de::DeserializeOwned;
use serde::Deserialize as _;
use serde_json::Value;

use crate::error::{body_preview, ApiError, Result};

/// Decode `body` into a list of `T` using the accepted shapes.
pub fn decode_records<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>> {
    let value: Value = serde_json::from_slice(body).map_err(|e| decoding_error::<T>(e.to_string(), body))?;
    decode_records_value(&value).map_err(|detail| decoding_error::<T>(detail, body))
}

/// Decode `body` into exactly one `T`.
pub fn decode_one<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| decoding_error::<T>(e.to_string(), body))
}

/// Shape matching on an already parsed value. The error is the diagnostic
/// from the last attempted shape.
pub(crate) fn decode_records_value<T: DeserializeOwned>(value: &Value) -> std::result::Result<Vec<T>, String> {
    if let Some(inner) = envelope_payload(value) {
        if let Ok(records) = Vec::<T>::deserialize(inner) {
            return Ok(records);
        }
    }

    if value.is_array() {
        return Vec::<T>::deserialize(value).map_err(|e| e.to_string());
    }

    T::deserialize(value)
        .map(|record| vec![record])
        .map_err(|e| e.to_string())
}

/// The array held by an envelope object, ignoring `@`-prefixed annotations.
fn envelope_payload(value: &Value) -> Option<&Value> {
    let object = value.as_object()?;
    let mut fields = object.iter().filter(|(key, _)| !key.starts_with('@'));
    let (_, inner) = fields.next()?;
    if fields.next().is_some() || !inner.is_array() {
        return None;
    }
    Some(inner)
}

pub(crate) fn decoding_error<T>(detail: String, body: &[u8]) -> ApiError {
    ApiError::Decoding {
        target: std::any::type_name::<T>(),
        detail,
        body: body_preview(body),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Contact {
        name: String,
        age: u32,
    }

    fn contacts() -> Vec<Contact> {
        vec![
            Contact {
                name: "Ann".to_string(),
                age: 40,
            },
            Contact {
                name: "Bob".to_string(),
                age: 31,
            },
        ]
    }

    #[test]
    fn envelope_shape() {
        let body = serde_json::to_vec(&serde_json::json!({ "value": contacts() })).unwrap();
        assert_eq!(decode_records::<Contact>(&body).unwrap(), contacts());
    }

    #[test]
    fn envelope_with_annotations() {
        let body = serde_json::to_vec(&serde_json::json!({
            "@odata.context": "https://fm/fmi/odata/v4/Db/$metadata#Contacts",
            "value": contacts(),
        }))
        .unwrap();
        assert_eq!(decode_records::<Contact>(&body).unwrap(), contacts());
    }

    #[test]
    fn bare_array_shape() {
        let body = serde_json::to_vec(&contacts()).unwrap();
        assert_eq!(decode_records::<Contact>(&body).unwrap(), contacts());
    }

    #[test]
    fn single_object_shape() {
        let body = serde_json::to_vec(&contacts()[0]).unwrap();
        assert_eq!(decode_records::<Contact>(&body).unwrap(), vec![contacts()[0].clone()]);
    }

    #[test]
    fn empty_envelope_is_an_empty_list() {
        let records = decode_records::<Contact>(br#"{"value": []}"#).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn mismatched_body_is_an_error() {
        let err = decode_records::<Contact>(br#"{"unexpected": true}"#).unwrap_err();
        match err {
            ApiError::Decoding { target, body, .. } => {
                assert!(target.ends_with("Contact"));
                assert_eq!(body, r#"{"unexpected": true}"#);
            }
            other => panic!("expected Decoding, got {other:?}"),
        }
    }

    #[test]
    fn array_of_wrong_items_is_an_error() {
        let err = decode_records::<Contact>(br#"[{"name": 1}]"#).unwrap_err();
        assert!(matches!(err, ApiError::Decoding { .. }));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let err = decode_records::<Contact>(b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Decoding { .. }));
    }

    #[test]
    fn empty_body_is_an_error() {
        assert!(decode_records::<Contact>(b"").is_err());
    }
}
