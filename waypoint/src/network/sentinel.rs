use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};

use super::QueuedReply;

/// Message of the offline response body.
pub const OFFLINE_MESSAGE: &str = "No Internet !";

/// Response extension describing an offline answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkExtra {
    /// Always `true`: the request did not reach the server.
    pub network_error: bool,
    /// Whether the request waits in the offline queue.
    pub queued: bool,
}

/// `503` answer returned instead of a real response while offline.
///
/// The body is `{"statusCode":503,"message":"No Internet !"}`. The response
/// carries a [`NetworkExtra`] extension and, when the request was queued, a
/// [`QueuedReply`] extension resolving with the replayed response.
pub(crate) fn offline_response(reply: Option<QueuedReply>) -> reqwest::Response {
    let body = serde_json::json!({
        "statusCode": StatusCode::SERVICE_UNAVAILABLE.as_u16(),
        "message": OFFLINE_MESSAGE,
    })
    .to_string();

    let mut response = http::Response::new(Bytes::from(body));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.extensions_mut().insert(NetworkExtra {
        network_error: true,
        queued: reply.is_some(),
    });
    if let Some(reply) = reply {
        response.extensions_mut().insert(reply);
    }
    reqwest::Response::from(response)
}
