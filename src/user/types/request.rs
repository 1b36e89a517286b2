use serde::Serialize;

use crate::auth::WithCredentials;

/// Subscription payload sent once when a user-channel socket opens.
///
/// The `auth` object is injected at serialization time via
/// [`WithCredentials::as_authenticated`]. An empty `markets` list subscribes
/// to every market the credentials can see.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct UserSubscription {
    /// Market ids carried by this group's websocket
    pub markets: Vec<String>,
    /// Always "USER"
    pub r#type: String,
}

impl WithCredentials for UserSubscription {}

impl UserSubscription {
    #[must_use]
    pub fn new(markets: Vec<String>) -> Self {
        Self {
            markets,
            r#type: "USER".to_owned(),
        }
    }
}
