//! Response payload stored in the response cache.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use waypoint_cache::{CacheKey, ResponseCache, Storage};

/// Header added to responses served from the cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache-status";

/// Response cache shared by the client and its stages.
pub type SharedCache = Arc<ResponseCache<Arc<dyn Storage>>>;

/// Request extension asking for cache read-through under the given key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCache(pub CacheKey);

/// Response extension marking a response served from the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FromCache;

/// Status, headers and body of a response, as kept in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers with a textual value, in response order.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Captures a response. Hop-by-hop and non-UTF-8 headers are dropped.
    pub fn new(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| **name != TRANSFER_ENCODING && **name != CONNECTION)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        Self {
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
        }
    }

    /// Stored status, `200 OK` if it is not a valid code.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    /// Stored headers plus `x-cache-status: HIT`.
    pub fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        headers
    }

    /// Rebuilds a response carrying the [`FromCache`] extension.
    pub fn into_response(self) -> reqwest::Response {
        let status = self.status();
        let headers = self.header_map();
        let mut response = http::Response::new(Bytes::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response.extensions_mut().insert(FromCache);
        reqwest::Response::from(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_not_stored() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let cached = CachedResponse::new(StatusCode::OK, &headers, b"{}");
        assert_eq!(
            cached.headers,
            vec![("content-type".to_owned(), "application/json".to_owned())]
        );
    }

    #[test]
    fn rebuilt_response_is_marked() {
        let cached = CachedResponse::new(StatusCode::CREATED, &HeaderMap::new(), b"hello");
        let response = cached.into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CACHE_STATUS_HEADER], "HIT");
        assert!(response.extensions().get::<FromCache>().is_some());
    }
}
