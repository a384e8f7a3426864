//! Trigger types for workflow initiation.
//!
//! A workflow declares one or more triggers; any single matching
//! trigger fires the whole workflow. Kind-specific parameters live in
//! `TriggerConfig`; an optional condition expression further narrows
//! when a matching event actually fires.

use serde::{Deserialize, Serialize};
use vellum_core::TriggerId;

/// The kind of trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// A document created/updated/deleted in a collection.
    CollectionEvent,
    /// A global (singleton document) changed.
    GlobalEvent,
    /// An HTTP webhook endpoint was called.
    Webhook,
    /// A scheduled cron tick.
    Cron,
    /// Explicit user- or API-initiated call.
    Manual,
}

/// Kind-specific trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TriggerConfig {
    /// Fires on a collection operation (e.g. `posts` + `update`).
    CollectionEvent {
        /// The collection identifier.
        collection: String,
        /// The operation name (`create`, `update`, `delete`, ...).
        operation: String,
    },
    /// Fires on a global-document operation.
    GlobalEvent {
        /// The global identifier.
        global: String,
        /// The operation name.
        operation: String,
    },
    /// Fires when the webhook path is called.
    Webhook {
        /// The webhook path (e.g. `/hooks/on-publish`).
        path: String,
    },
    /// Fires on a cron tick matching the schedule expression.
    Cron {
        /// Cron expression (e.g. `0 7 * * *`).
        schedule: String,
    },
    /// Fires only when invoked explicitly.
    Manual,
}

impl TriggerConfig {
    /// Returns the kind of this configuration.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        match self {
            Self::CollectionEvent { .. } => TriggerKind::CollectionEvent,
            Self::GlobalEvent { .. } => TriggerKind::GlobalEvent,
            Self::Webhook { .. } => TriggerKind::Webhook,
            Self::Cron { .. } => TriggerKind::Cron,
            Self::Manual => TriggerKind::Manual,
        }
    }
}

/// A trigger entry on a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for this trigger.
    pub id: TriggerId,
    /// Kind-specific configuration.
    pub config: TriggerConfig,
    /// Optional condition expression; absent means always fire.
    pub condition: Option<String>,
}

impl Trigger {
    /// Creates a new trigger with no condition.
    #[must_use]
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            id: TriggerId::new(),
            config,
            condition: None,
        }
    }

    /// Sets the condition expression.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Returns the trigger kind.
    #[must_use]
    pub fn kind(&self) -> TriggerKind {
        self.config.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_trigger_kind() {
        let trigger = Trigger::new(TriggerConfig::CollectionEvent {
            collection: "posts".to_string(),
            operation: "update".to_string(),
        });
        assert_eq!(trigger.kind(), TriggerKind::CollectionEvent);
        assert!(trigger.condition.is_none());
    }

    #[test]
    fn trigger_with_condition() {
        let trigger = Trigger::new(TriggerConfig::Manual)
            .with_condition("trigger.data.force == true");
        assert_eq!(trigger.kind(), TriggerKind::Manual);
        assert_eq!(
            trigger.condition.as_deref(),
            Some("trigger.data.force == true")
        );
    }

    #[test]
    fn trigger_serde_roundtrip() {
        let trigger = Trigger::new(TriggerConfig::Webhook {
            path: "/hooks/on-publish".to_string(),
        });
        let json = serde_json::to_string(&trigger).expect("serialize");
        assert!(json.contains("\"type\":\"webhook\""));

        let parsed: Trigger = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(trigger, parsed);
    }

    #[test]
    fn cron_config_serde_tag() {
        let config = TriggerConfig::Cron {
            schedule: "0 7 * * *".to_string(),
        };
        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["type"], "cron");
        assert_eq!(json["schedule"], "0 7 * * *");
    }
}
