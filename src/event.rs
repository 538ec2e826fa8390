//! Wire event model: semantic calls, enriched events, message ids.
//!
//! `properties` and `traits` are JSON object maps; nesting is arbitrary.
//! Unset optional fields are omitted from wire JSON, and an empty map is
//! serialised as an absent field rather than `{}`.

use crate::context::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON object map used for `properties`, `traits`, and `integrations`.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A semantic call as the application emitted it, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCall {
    Track { event: String, properties: Option<JsonMap> },
    Identify { user_id: String, traits: Option<JsonMap> },
    Group { group_id: String, traits: Option<JsonMap> },
    Screen { name: String, properties: Option<JsonMap> },
    Page { name: String, properties: Option<JsonMap> },
    Alias { new_user_id: String },
}

impl RawCall {
    pub fn kind(&self) -> EventKind {
        match self {
            RawCall::Track { .. } => EventKind::Track,
            RawCall::Identify { .. } => EventKind::Identify,
            RawCall::Group { .. } => EventKind::Group,
            RawCall::Screen { .. } => EventKind::Screen,
            RawCall::Page { .. } => EventKind::Page,
            RawCall::Alias { .. } => EventKind::Alias,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Track,
    Identify,
    Group,
    Screen,
    Page,
    Alias,
}

/// A wire-shaped event: the raw call plus identity, context, and metadata.
/// `sent_at` stays unset until the dispatcher commits the event to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub anonymous_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub properties: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub traits: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub integrations: Option<JsonMap>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sent_at: Option<String>,
    pub write_key: String,
    pub message_id: String,
    pub context: Context,
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:34:56.789Z`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `{epochMillis}-{uuidv4}`.
pub fn new_message_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4())
}

/// A message id is valid when its first dash-separated segment parses as a
/// signed 64-bit integer and the remaining five form a lexical UUID.
pub fn is_valid_message_id(id: &str) -> bool {
    let segments: Vec<&str> = id.split('-').collect();
    if segments.len() != 6 {
        return false;
    }
    if segments[0].parse::<i64>().is_err() {
        return false;
    }
    Uuid::parse_str(&segments[1..].join("-")).is_ok()
}

#[cfg(test)]
pub(crate) fn test_event(label: &str) -> EnrichedEvent {
    EnrichedEvent {
        kind: EventKind::Track,
        event: Some(label.to_string()),
        name: None,
        anonymous_id: "00000000-0000-4000-8000-000000000000".to_string(),
        user_id: None,
        group_id: None,
        properties: None,
        traits: None,
        integrations: None,
        timestamp: now_iso8601(),
        sent_at: None,
        write_key: "wk-test".to_string(),
        message_id: new_message_id(),
        context: Context::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_message_ids_validate_and_embed_the_clock() {
        let before = Utc::now().timestamp_millis();
        let id = new_message_id();
        let after = Utc::now().timestamp_millis();
        assert!(is_valid_message_id(&id), "generated id {id} should validate");

        let embedded: i64 = id.split('-').next().expect("segment").parse().expect("millis");
        assert!(embedded >= before && embedded <= after);
    }

    #[test]
    fn validator_rejects_malformed_ids() {
        assert!(!is_valid_message_id(""));
        assert!(!is_valid_message_id("1700000000000"));
        assert!(!is_valid_message_id("abc-6ba7b810-9dad-11d1-80b4-00c04fd430c8"));
        assert!(!is_valid_message_id("1700000000000-not-a-uuid-at-all-x"));
        assert!(!is_valid_message_id("1700000000000-6ba7b810-9dad-11d1-80b4"));
    }

    #[test]
    fn validator_accepts_a_signed_prefix() {
        assert!(is_valid_message_id("42-6ba7b810-9dad-11d1-80b4-00c04fd430c8"));
    }

    #[test]
    fn unset_optionals_are_omitted_from_wire_json() {
        let event = test_event("signup");
        let json = serde_json::to_value(&event).expect("event serialises");
        assert_eq!(json["type"], "track");
        assert_eq!(json["event"], "signup");
        assert!(json.get("userId").is_none());
        assert!(json.get("groupId").is_none());
        assert!(json.get("properties").is_none());
        assert!(json.get("traits").is_none());
        assert!(json.get("integrations").is_none());
        assert!(json.get("sentAt").is_none());
        assert!(json.get("anonymousId").is_some());
        assert!(json.get("messageId").is_some());
        assert!(json.get("writeKey").is_some());
    }

    #[test]
    fn wire_json_round_trips_structurally() {
        let mut event = test_event("purchase");
        let mut properties = JsonMap::new();
        properties.insert("sku".to_string(), json!("A-1"));
        properties.insert("price".to_string(), json!(19.99));
        properties.insert("qty".to_string(), json!(2));
        properties.insert("gift".to_string(), json!(false));
        properties.insert("coupon".to_string(), json!(null));
        properties.insert("tags".to_string(), json!(["a", "b"]));
        properties.insert("nested".to_string(), json!({"deep": {"ok": true}}));
        event.properties = Some(properties);
        event.user_id = Some("u-1".to_string());
        event.sent_at = Some(now_iso8601());

        let bytes = serde_json::to_vec(&event).expect("serialise");
        let decoded: EnrichedEvent = serde_json::from_slice(&bytes).expect("deserialise");
        assert_eq!(decoded, event);
    }

    #[test]
    fn timestamps_are_millisecond_utc() {
        let stamp = now_iso8601();
        assert!(stamp.ends_with('Z'), "{stamp} should be UTC");
        let fractional = stamp.split('.').nth(1).expect("fractional part");
        assert_eq!(fractional.len(), 4, "{stamp} should carry exactly millis"); // "mmmZ"
    }
}
