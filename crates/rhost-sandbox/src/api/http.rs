use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use url::Url;
use wasmtime::Caller;

use super::sentinel;
use crate::fetch::{FetchError, FetchRequest};
use crate::host::{HostState, authorize, caller_memory};
use crate::memory::{read_memory, write_memory_at};

const OCTET_STREAM: &str = "application/octet-stream";

/// Decode the method code a runnable passes to `fetch_url`.
pub fn method_from_code(code: i32) -> Option<Method> {
    match code {
        1 => Some(Method::GET),
        2 => Some(Method::POST),
        3 => Some(Method::PATCH),
        4 => Some(Method::DELETE),
        _ => None,
    }
}

/// Decode the `::`-delimited target of a `fetch_url` call.
///
/// The first segment is the URL, every following segment a `key:value`
/// header, e.g. `https://example.com/a::authorization:bearer xyz`.
pub fn parse_fetch_target(raw: &[u8], method: Method, body: Vec<u8>) -> Result<FetchRequest, String> {
    let text = std::str::from_utf8(raw).map_err(|_| "url is not valid utf-8".to_owned())?;

    let mut segments = text.split("::");
    let target = segments.next().unwrap_or_default();
    let url = Url::parse(target).map_err(|e| format!("invalid url `{target}`: {e}"))?;

    let mut headers = HeaderMap::new();
    for segment in segments.filter(|s| !s.is_empty()) {
        let (key, value) = segment
            .split_once(':')
            .ok_or_else(|| format!("malformed header `{segment}`"))?;
        let name = HeaderName::from_bytes(key.trim().as_bytes())
            .map_err(|e| format!("invalid header name `{key}`: {e}"))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| format!("invalid header value for `{key}`: {e}"))?;
        headers.append(name, value);
    }

    if !body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    }

    Ok(FetchRequest {
        method,
        url,
        headers,
        body,
    })
}

/// `fetch_url(method, url_ptr, url_size, body_ptr, body_size, dest_ptr, dest_max, token) -> len`
///
/// Writes the response body at `dest_ptr` only when it fits in `dest_max`,
/// and always returns the true length so the runnable can retry with a
/// larger buffer.
#[allow(clippy::too_many_arguments)]
pub(super) fn fetch_url(
    mut caller: Caller<'_, HostState>,
    method: i32,
    url_pointer: i32,
    url_size: i32,
    body_pointer: i32,
    body_size: i32,
    dest_pointer: i32,
    dest_max_size: i32,
    token: i32,
) -> i32 {
    if !authorize(&caller, token, "fetch_url") {
        return sentinel::INVALID_TOKEN;
    }

    let runnable = caller.data().name.clone();

    let Some(method) = method_from_code(method) else {
        tracing::warn!(runnable = %runnable, method, "fetch_url: invalid method code");
        return sentinel::BAD_REQUEST;
    };

    let Some(memory) = caller_memory(&mut caller) else {
        return sentinel::MEMORY_FAULT;
    };

    let target = match read_memory(&caller, &memory, url_pointer, url_size) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(runnable = %runnable, error = %e, "fetch_url: unreadable url");
            return sentinel::MEMORY_FAULT;
        }
    };

    let body = if body_size == 0 {
        Vec::new()
    } else {
        match read_memory(&caller, &memory, body_pointer, body_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(runnable = %runnable, error = %e, "fetch_url: unreadable body");
                return sentinel::MEMORY_FAULT;
            }
        }
    };

    let request = match parse_fetch_target(&target, method, body) {
        Ok(request) => request,
        Err(reason) => {
            tracing::warn!(runnable = %runnable, reason = %reason, "fetch_url: bad request");
            return sentinel::BAD_REQUEST;
        }
    };

    let fetcher = Arc::clone(&caller.data().fetcher);
    let response = match fetcher.fetch(&request) {
        Ok(bytes) => bytes,
        Err(e @ FetchError::Transport(_)) => {
            tracing::warn!(runnable = %runnable, url = %request.url, error = %e, "fetch_url failed");
            return sentinel::TRANSPORT_FAILURE;
        }
        Err(e @ FetchError::Body(_)) => {
            tracing::warn!(runnable = %runnable, url = %request.url, error = %e, "fetch_url failed");
            return sentinel::BODY_READ_FAILURE;
        }
    };

    let Ok(length) = i32::try_from(response.len()) else {
        tracing::warn!(runnable = %runnable, size = response.len(), "fetch_url: response too large");
        return sentinel::BODY_READ_FAILURE;
    };

    if length <= dest_max_size {
        if let Err(e) = write_memory_at(&mut caller, &memory, dest_pointer, &response) {
            tracing::warn!(runnable = %runnable, error = %e, "fetch_url: destination out of bounds");
            return sentinel::MEMORY_FAULT;
        }
    }

    length
}
