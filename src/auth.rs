/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Type alias for API keys, which are UUIDs.
pub type ApiKey = Uuid;

/// Set of credentials used to authenticate the user websocket channel.
///
/// The crate treats these opaquely: they are serialized into the channel's
/// subscription payload and never interpreted or signed locally.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(alias = "apiKey")]
    pub(crate) key: ApiKey,
    pub(crate) secret: SecretString,
    pub(crate) passphrase: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(key: Uuid, secret: String, passphrase: String) -> Self {
        Self {
            key,
            secret: SecretString::from(secret),
            passphrase: SecretString::from(passphrase),
        }
    }

    /// Returns the API key.
    #[must_use]
    pub fn key(&self) -> ApiKey {
        self.key
    }

    /// Returns the secret.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// Returns the passphrase.
    #[must_use]
    pub fn passphrase(&self) -> &SecretString {
        &self.passphrase
    }
}

/// Serializes a subscription payload with an `auth` object injected.
pub trait WithCredentials: Serialize + Sized {
    fn as_authenticated(&self, credentials: &Credentials) -> Result<String, serde_json::Error> {
        let mut payload_json = serde_json::to_value(self)?;
        let auth = json!({
            "apiKey": credentials.key.to_string(),
            "secret": credentials.secret.expose_secret(),
            "passphrase": credentials.passphrase.expose_secret(),
        });

        if let Value::Object(ref mut obj) = payload_json {
            obj.insert("auth".to_owned(), auth);
        }

        serde_json::to_string(&payload_json)
    }
}
