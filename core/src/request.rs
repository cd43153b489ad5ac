//! Request construction: URL assembly, percent-encoding, headers, JSON bodies.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;

use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest};

/// Bytes that are not safe inside a URL query. Alphanumerics and
/// `! $ & ' ( ) * + , - . / : ; = ? @ _ ~` pass through; non-ASCII is
/// always encoded.
const QUERY_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Builds authenticated requests against one base URI.
///
/// The authorization value is captured when the builder is created, so each
/// request carries the header that was current when it was built.
#[derive(Debug, Clone)]
pub struct RequestBuilder<'a> {
    base_uri: &'a str,
    authorization: String,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(base_uri: &'a str, authorization: String) -> Self {
        Self {
            base_uri,
            authorization,
        }
    }

    /// `path` is appended verbatim to the base URI and may carry a query string.
    pub fn build(&self, path: &str, method: HttpMethod) -> Result<HttpRequest> {
        let raw = format!("{}{}", self.base_uri, path);
        let url = encode_url(&raw);
        url::Url::parse(&url).map_err(|e| ApiError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(HttpRequest {
            method,
            url,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), self.authorization.clone()),
            ],
            body: None,
        })
    }

    /// As [`build`](Self::build), with `payload` serialized as the JSON body.
    pub fn build_with_payload<P>(&self, path: &str, method: HttpMethod, payload: &P) -> Result<HttpRequest>
    where
        P: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|e| ApiError::Serialization(e.to_string()))?;
        let mut request = self.build(path, method)?;
        request.body = Some(body);
        Ok(request)
    }
}

/// Percent-encode `raw` for use as a request URL.
///
/// Well-formed `%XX` escapes are left untouched, so encoding an already
/// encoded URL returns it unchanged.
pub fn encode_url(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let is_escape = bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit();
        if is_escape {
            out.extend(utf8_percent_encode(&raw[start..i], QUERY_UNSAFE));
            out.push_str(&raw[i..i + 3]);
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }
    out.extend(utf8_percent_encode(&raw[start..], QUERY_UNSAFE));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://fm.example.com/fmi/odata/v4/Db";

    fn builder() -> RequestBuilder<'static> {
        RequestBuilder::new(BASE, "Basic YWxpY2U6c2VjcmV0MTIz".to_string())
    }

    #[test]
    fn build_sets_headers_and_url() {
        let req = builder().build("/Contacts", HttpMethod::Get).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://fm.example.com/fmi/odata/v4/Db/Contacts");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("Authorization"), Some("Basic YWxpY2U6c2VjcmV0MTIz"));
        assert!(req.body.is_none());
    }

    #[test]
    fn space_in_table_name_is_encoded_once() {
        let req = builder().build("/My Table('A B')", HttpMethod::Get).unwrap();
        assert_eq!(req.url, format!("{BASE}/My%20Table('A%20B')"));

        let again = encode_url(&req.url);
        assert_eq!(again, req.url);
    }

    #[test]
    fn query_characters_survive() {
        let req = builder()
            .build("/Contacts?$filter=name eq 'Ann'&$top=5", HttpMethod::Get)
            .unwrap();
        assert_eq!(
            req.url,
            format!("{BASE}/Contacts?$filter=name%20eq%20'Ann'&$top=5")
        );
    }

    #[test]
    fn lone_percent_and_non_ascii_are_encoded() {
        assert_eq!(encode_url("a%zz"), "a%25zz");
        assert_eq!(encode_url("100%"), "100%25");
        assert_eq!(encode_url("café"), "caf%C3%A9");
        assert_eq!(encode_url("a\"b#c"), "a%22b%23c");
    }

    #[test]
    fn payload_becomes_json_body() {
        #[derive(Serialize)]
        struct Contact<'a> {
            name: &'a str,
            age: u32,
            email: Option<&'a str>,
        }

        let req = builder()
            .build_with_payload(
                "/Contacts",
                HttpMethod::Post,
                &Contact {
                    name: "Ann",
                    age: 40,
                    email: None,
                },
            )
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"name": "Ann", "age": 40, "email": null}));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let builder = RequestBuilder::new("not a url", "Basic Og==".to_string());
        let err = builder.build("/x", HttpMethod::Get).unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl { .. }));
    }
}
