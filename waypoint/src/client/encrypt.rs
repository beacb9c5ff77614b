use async_trait::async_trait;

use crate::CallbackError;

/// Transforms serialized request bodies sent with
/// [`RequestOptions::encrypt_body`](crate::RequestOptions::encrypt_body).
///
/// The input is the JSON text of the body; the output is sent as is with a
/// `text/plain` content type, unless the request sets its own.
#[async_trait]
pub trait BodyEncryptor: Send + Sync {
    /// Encrypts `plaintext`.
    async fn encrypt(&self, plaintext: String) -> Result<String, CallbackError>;
}

/// Encryptor returning its input unchanged. Used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEncryptor;

#[async_trait]
impl BodyEncryptor for IdentityEncryptor {
    async fn encrypt(&self, plaintext: String) -> Result<String, CallbackError> {
        Ok(plaintext)
    }
}
