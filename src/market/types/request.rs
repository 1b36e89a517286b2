use serde::Serialize;

/// Subscription payload sent once when a market-channel socket opens.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct MarketSubscription {
    /// Asset ids carried by this group's websocket
    #[serde(rename = "assets_ids")]
    pub asset_ids: Vec<String>,
    /// Always "market"
    pub r#type: String,
    /// Request a full book snapshot for each asset on subscribe
    pub initial_dump: bool,
}

impl MarketSubscription {
    #[must_use]
    pub fn new(asset_ids: Vec<String>, initial_dump: bool) -> Self {
        Self {
            asset_ids,
            r#type: "market".to_owned(),
            initial_dump,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_market_subscription() {
        let request =
            MarketSubscription::new(vec!["asset1".to_owned(), "asset2".to_owned()], true);

        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"type\":\"market\""));
        assert!(json.contains("\"assets_ids\":[\"asset1\",\"asset2\"]"));
        assert!(json.contains("\"initial_dump\":true"));
    }

    #[test]
    fn serialize_without_initial_dump() {
        let request = MarketSubscription::new(vec!["asset1".to_owned()], false);

        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("\"initial_dump\":false"));
    }
}
