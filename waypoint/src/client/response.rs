use std::fmt;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::cached::{CachedResponse, FromCache};
use crate::network::{NetworkExtra, QueuedReply};

/// Buffered answer of a [`Client`](crate::Client) call.
///
/// While offline the client answers with a `503` whose [`network`](Self::network)
/// field is set; if the request was queued, [`queued`](Self::queued) resolves
/// with the replayed response once the network is back.
#[derive(Debug)]
pub struct ApiResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// The response was served from the cache.
    pub from_cache: bool,
    /// Set on offline answers.
    pub network: Option<NetworkExtra>,
    /// Set when the request waits in the offline queue.
    pub queued: Option<PendingReplay>,
}

impl ApiResponse {
    pub(crate) async fn read(mut response: reqwest::Response) -> Result<Self> {
        let network = response.extensions().get::<NetworkExtra>().copied();
        let from_cache = response.extensions().get::<FromCache>().is_some();
        let queued = response
            .extensions_mut()
            .remove::<QueuedReply>()
            .map(|reply| PendingReplay { reply });
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            body,
            from_cache,
            network,
            queued,
        })
    }

    pub(crate) fn from_cached(cached: CachedResponse) -> Self {
        Self {
            status: cached.status(),
            headers: cached.header_map(),
            body: Bytes::from(cached.body),
            from_cache: true,
            network: None,
            queued: None,
        }
    }

    pub(crate) fn to_cached(&self) -> CachedResponse {
        CachedResponse::new(self.status, &self.headers, &self.body)
    }

    /// `2xx` status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The request did not reach the server because the device is offline.
    pub fn is_offline(&self) -> bool {
        self.network.is_some_and(|extra| extra.network_error)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Request waiting in the offline queue.
pub struct PendingReplay {
    reply: QueuedReply,
}

impl fmt::Debug for PendingReplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReplay")
            .field("id", &self.reply.id())
            .finish()
    }
}

impl PendingReplay {
    /// Queue-local identifier of the request.
    pub fn id(&self) -> u64 {
        self.reply.id()
    }

    /// Waits for the request to be replayed and buffers its response.
    ///
    /// See [`QueuedReply::wait`] for the failure cases.
    pub async fn wait(self) -> Result<ApiResponse> {
        let response = self.reply.wait().await?;
        ApiResponse::read(response).await
    }

    /// The underlying queue handle.
    pub fn into_inner(self) -> QueuedReply {
        self.reply
    }
}

/// Result of [`Client::download`](crate::Client::download).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Response status. The file is only written for `2xx`.
    pub status: StatusCode,
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// Set when the download could not start because the device is offline.
    pub network: Option<NetworkExtra>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cached_responses_keep_status_and_body() {
        let cached = CachedResponse::new(StatusCode::CREATED, &HeaderMap::new(), b"{\"id\":7}");
        let response = ApiResponse::from_cached(cached);

        assert_eq!(response.status, StatusCode::CREATED);
        assert!(response.from_cache);
        assert!(!response.is_offline());
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn offline_response_is_recognized() {
        let response = ApiResponse::read(crate::network::offline_response(None))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.is_offline());
        assert!(response.queued.is_none());
        assert!(response.text().contains("No Internet !"));
    }
}
