//! Composes a semantic call, an identity snapshot, and the current context
//! into a wire event.
//!
//! The enricher is pure: identity side-effects (identify/group writing
//! through the store) happen in the client before the snapshot is taken, so
//! an alias call sees the snapshot's `user_id` as the previous one.

use crate::context::Context;
use crate::event::{new_message_id, now_iso8601, EnrichedEvent, JsonMap, RawCall};
use crate::identity::Identity;

#[derive(Debug, Clone)]
pub struct Enricher {
    write_key: String,
}

impl Enricher {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self { write_key: write_key.into() }
    }

    /// Build the wire event. A caller-provided `timestamp` is used verbatim;
    /// otherwise the enrichment instant is stamped. `sent_at` stays unset
    /// until drain time.
    pub fn enrich(
        &self,
        call: RawCall,
        identity: &Identity,
        context: &Context,
        timestamp: Option<String>,
    ) -> EnrichedEvent {
        let mut enriched = EnrichedEvent {
            kind: call.kind(),
            event: None,
            name: None,
            anonymous_id: identity.anonymous_id.clone(),
            user_id: identity.user_id.clone(),
            group_id: identity.group_id.clone(),
            properties: None,
            traits: None,
            integrations: None,
            timestamp: timestamp.unwrap_or_else(now_iso8601),
            sent_at: None,
            write_key: self.write_key.clone(),
            message_id: new_message_id(),
            context: context.clone(),
        };

        match call {
            RawCall::Track { event, properties } => {
                enriched.event = Some(event);
                enriched.properties = non_empty(properties);
            }
            RawCall::Identify { user_id, traits } => {
                enriched.user_id = Some(user_id);
                enriched.traits = non_empty(traits);
            }
            RawCall::Group { group_id, traits } => {
                if !group_id.is_empty() {
                    let mut properties = JsonMap::new();
                    properties.insert("groupId".to_string(), group_id.clone().into());
                    enriched.properties = Some(properties);
                }
                enriched.group_id = Some(group_id);
                enriched.traits = non_empty(traits);
            }
            RawCall::Screen { name, properties } | RawCall::Page { name, properties } => {
                let mut merged = properties.unwrap_or_default();
                merged.insert("name".to_string(), name.clone().into());
                enriched.name = Some(name);
                enriched.properties = Some(merged);
            }
            RawCall::Alias { new_user_id } => {
                if let Some(previous) = identity.user_id.clone() {
                    let mut properties = JsonMap::new();
                    properties.insert("previousId".to_string(), previous.into());
                    enriched.properties = Some(properties);
                }
                enriched.user_id = Some(new_user_id);
            }
        }

        enriched
    }
}

fn non_empty(map: Option<JsonMap>) -> Option<JsonMap> {
    map.filter(|m| !m.is_empty())
}
