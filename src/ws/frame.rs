//! Shape inspection for incoming frames.
//!
//! Server frames are either a single event object or an array of them, and
//! events are discriminated by an `event_type` field. Peeking at the shape
//! first lets the channel parsers skip full deserialization for events they
//! cannot route.

use std::fmt;

use serde::Deserializer as _;
use serde::de::{IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Deserializer;

/// Result of peeking at a frame without full deserialization.
pub(crate) enum FrameShape {
    /// Single object with the given `event_type` (if present).
    Single(Option<String>),
    /// Array of events requiring per-element inspection.
    Array,
}

/// Peeks at the JSON structure to determine if it's a single object or array,
/// and extracts the `event_type` for single objects without full deserialization.
pub(crate) fn peek_frame_shape(bytes: &[u8]) -> Result<FrameShape, serde_json::Error> {
    struct ShapePeeker;

    impl<'de> Visitor<'de> for ShapePeeker {
        type Value = FrameShape;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a JSON object or array")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            // Consume the entire sequence to avoid "trailing characters" error
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(FrameShape::Array)
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut event_type: Option<String> = None;
            while let Some(key) = map.next_key::<&str>()? {
                if key == "event_type" {
                    event_type = Some(map.next_value::<String>()?);
                } else {
                    map.next_value::<IgnoredAny>()?;
                }
            }
            Ok(FrameShape::Single(event_type))
        }
    }

    let mut de = Deserializer::from_slice(bytes);
    de.deserialize_any(ShapePeeker)
}

/// The `event_type` of one already-parsed array element, if present.
pub(crate) fn event_type_of(value: &serde_json::Value) -> Option<&str> {
    value.get("event_type").and_then(serde_json::Value::as_str)
}
