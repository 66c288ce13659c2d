//! Coordinated requests.
//!
//! A [`CoordinatedRequest`] is the unit of data carried through a handler
//! pipeline and marshaled into runnables.  Its JSON shape is shared with the
//! surrounding HTTP layer; byte fields travel as base64 strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A request whose fulfillment is coordinated across several runnables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatedRequest {
    /// HTTP method, e.g. `GET`.
    #[serde(default)]
    pub method: String,
    /// Request URI (path and query).
    #[serde(default)]
    pub url: String,
    /// Correlation id.
    #[serde(rename = "request_id", default)]
    pub id: String,
    /// Raw request body.
    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
    /// Flattened headers, first value wins.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Flattened path parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Outputs accumulated by earlier pipeline steps.
    #[serde(with = "base64_map", default)]
    pub state: BTreeMap<String, Vec<u8>>,
}

/// Which part of a request `request_get_field` looks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `method`, `url`, `id` or `body`.
    Meta,
    /// A top-level field of the JSON body.
    Body,
    /// A header, matched case-insensitively.
    Header,
    /// A path parameter.
    Params,
    /// A state entry.
    State,
}

impl TryFrom<i32> for FieldKind {
    type Error = i32;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Meta),
            1 => Ok(Self::Body),
            2 => Ok(Self::Header),
            3 => Ok(Self::Params),
            4 => Ok(Self::State),
            other => Err(other),
        }
    }
}

/// Why a field lookup produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The key is not present.
    #[error("field not set")]
    NotSet,
    /// The field exists in principle but cannot be read (e.g. the body is not
    /// a JSON object).
    #[error("field not accessible: {0}")]
    NotAccessible(String),
}

impl CoordinatedRequest {
    /// Create a request with the given method and URL and no body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the raw body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a path parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Decode a request from its JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the request as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The path portion of the URL, without the query string.
    pub fn path(&self) -> &str {
        self.url.split(['?', '#']).next().unwrap_or_default()
    }

    /// Look up a header by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Read a top-level field from the JSON body.
    ///
    /// String values are returned as-is, anything else as its JSON text.
    /// An empty body has no fields.
    pub fn body_field(&self, key: &str) -> std::result::Result<Option<String>, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(None);
        }

        let values: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&self.body)?;
        Ok(values.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    /// Resolve a field for `request_get_field`.
    pub fn field(&self, kind: FieldKind, key: &str) -> std::result::Result<Vec<u8>, FieldError> {
        match kind {
            FieldKind::Meta => match key {
                "method" => Ok(self.method.as_bytes().to_vec()),
                "url" => Ok(self.url.as_bytes().to_vec()),
                "id" => Ok(self.id.as_bytes().to_vec()),
                "body" => Ok(self.body.clone()),
                _ => Err(FieldError::NotSet),
            },
            FieldKind::Body => match self.body_field(key) {
                Ok(Some(value)) => Ok(value.into_bytes()),
                Ok(None) => Err(FieldError::NotSet),
                Err(e) => Err(FieldError::NotAccessible(e.to_string())),
            },
            FieldKind::Header => self
                .header(key)
                .map(|v| v.as_bytes().to_vec())
                .ok_or(FieldError::NotSet),
            FieldKind::Params => self
                .params
                .get(key)
                .map(|v| v.as_bytes().to_vec())
                .ok_or(FieldError::NotSet),
            FieldKind::State => self.state.get(key).cloned().ok_or(FieldError::NotSet),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

mod base64_map {
    use std::collections::BTreeMap;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k, STANDARD.encode(v))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v)
                    .map(|bytes| (k, bytes))
                    .map_err(de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CoordinatedRequest {
        CoordinatedRequest::new("POST", "/api/v1/user/42?verbose=1")
            .with_id("req-1")
            .with_body(br#"{"name":"ada","age":36}"#.to_vec())
            .with_header("Content-Type", "application/json")
            .with_param("id", "42")
    }

    #[test]
    fn json_shape_matches_wire_format() {
        let mut req = sample();
        req.state.insert("getUser".into(), b"hi".to_vec());

        let value: serde_json::Value = serde_json::from_slice(&req.to_json().unwrap()).unwrap();
        assert_eq!(value["method"], "POST");
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["body"], "eyJuYW1lIjoiYWRhIiwiYWdlIjozNn0=");
        assert_eq!(value["state"]["getUser"], "aGk=");
        assert_eq!(value["params"]["id"], "42");
    }

    #[test]
    fn decodes_go_style_nulls() {
        let raw = br#"{"method":"GET","url":"/","request_id":"x","body":null,"headers":{},"params":{},"state":null}"#;
        let req = CoordinatedRequest::from_json(raw).unwrap();
        assert!(req.body.is_empty());
        assert!(req.state.is_empty());
    }

    #[test]
    fn path_strips_query() {
        assert_eq!(sample().path(), "/api/v1/user/42");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = sample();
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn body_field_values() {
        let req = sample();
        assert_eq!(req.body_field("name").unwrap().as_deref(), Some("ada"));
        assert_eq!(req.body_field("age").unwrap().as_deref(), Some("36"));
        assert_eq!(req.body_field("nope").unwrap(), None);
    }

    #[test]
    fn field_lookup_by_kind() {
        let mut req = sample();
        req.state.insert("prev".into(), vec![1, 2, 3]);

        assert_eq!(req.field(FieldKind::Meta, "method").unwrap(), b"POST");
        assert_eq!(req.field(FieldKind::Meta, "id").unwrap(), b"req-1");
        assert_eq!(req.field(FieldKind::Meta, "other"), Err(FieldError::NotSet));
        assert_eq!(req.field(FieldKind::Body, "name").unwrap(), b"ada");
        assert_eq!(req.field(FieldKind::Header, "CONTENT-TYPE").unwrap(), b"application/json");
        assert_eq!(req.field(FieldKind::Params, "id").unwrap(), b"42");
        assert_eq!(req.field(FieldKind::State, "prev").unwrap(), vec![1, 2, 3]);
        assert_eq!(req.field(FieldKind::State, "missing"), Err(FieldError::NotSet));
    }

    #[test]
    fn non_json_body_is_not_accessible() {
        let req = CoordinatedRequest::new("POST", "/").with_body(b"plain text".to_vec());
        assert!(matches!(
            req.field(FieldKind::Body, "x"),
            Err(FieldError::NotAccessible(_))
        ));
    }

    #[test]
    fn field_kind_codes() {
        assert_eq!(FieldKind::try_from(0), Ok(FieldKind::Meta));
        assert_eq!(FieldKind::try_from(4), Ok(FieldKind::State));
        assert_eq!(FieldKind::try_from(9), Err(9));
    }
}
