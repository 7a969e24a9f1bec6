// src/input.rs
//! Request input normalization: query string and body decoded into plain maps.

use actix_web::{dev::Payload, http::Method, web, FromRequest, HttpRequest};
use futures_util::future::LocalBoxFuture;
use serde_json::{Map, Value};

use crate::error::ApiError;

pub type InputMap = Map<String, Value>;

/// Method, query and body of a request, decoded once per request.
#[derive(Debug, Clone)]
pub struct RequestInput {
    pub method: Method,
    pub query: InputMap,
    pub body: InputMap,
}

impl FromRequest for RequestInput {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let method = req.method().clone();
        let query = decode_form(req.query_string().as_bytes());
        let bytes = web::Bytes::from_request(req, payload);

        Box::pin(async move {
            let raw = bytes
                .await
                .map_err(|e| ApiError::BadRequest(format!("Unable to read request body: {}", e)))?;
            Ok(RequestInput {
                method,
                query,
                body: decode_body(&raw),
            })
        })
    }
}

/// JSON object first. A body that looks like JSON but is not an object, or does not
/// parse, yields an empty map; only non-JSON text is read as a form.
pub fn decode_body(raw: &[u8]) -> InputMap {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => InputMap::new(),
        Err(_) if looks_like_json(raw) => InputMap::new(),
        Err(_) => decode_form(raw),
    }
}

fn looks_like_json(raw: &[u8]) -> bool {
    matches!(
        raw.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[') | Some(b'"')
    )
}

pub fn decode_form(raw: &[u8]) -> InputMap {
    url::form_urlencoded::parse(raw)
        .into_owned()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

pub trait InputMapExt {
    /// Trimmed textual value; `None` for absent, null, empty or structured values.
    fn text(&self, key: &str) -> Option<String>;
}

impl InputMapExt for InputMap {
    fn text(&self, key: &str) -> Option<String> {
        value_text(self.get(key)?)
    }
}

pub fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
