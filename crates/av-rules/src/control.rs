//! Control channel
//!
//! Messages from the popup or other extension pages, and the lifecycle hook
//! that applies the persisted flag at install and browser startup.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::source::RuleSource;
use crate::store::{effective_enabled, StateStore};
use crate::sync::{RuleEngine, RuleSynchronizer, SyncError};

/// A control message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "set-enabled", alias = "SetEnabled")]
    SetEnabled {
        #[serde(default)]
        enabled: bool,
    },
    #[serde(rename = "reload-rules", alias = "ReloadRules")]
    ReloadRules,
    #[serde(rename = "ping", alias = "Ping")]
    Ping,
}

impl ControlMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// What handling this message requires, given the stored flag.
    pub fn action(&self, stored_enabled: Option<bool>) -> ControlAction {
        match *self {
            Self::SetEnabled { enabled } => ControlAction::Synchronize { enabled, persist: true },
            Self::ReloadRules => ControlAction::Synchronize {
                enabled: stored_enabled.unwrap_or(true),
                persist: false,
            },
            Self::Ping => ControlAction::Pong,
        }
    }
}

/// Steps a host must take for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControlAction {
    /// Optionally persist `enabled`, then synchronize to it.
    Synchronize { enabled: bool, persist: bool },
    Pong,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<usize>,
}

impl ControlResponse {
    pub fn success() -> Self {
        Self { ok: true, ..Default::default() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn pong(timestamp: u64) -> Self {
        Self {
            ok: true,
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns the synchronizer and the persisted flag for a background context.
pub struct Controller<S, E, St> {
    synchronizer: RuleSynchronizer<S, E>,
    store: St,
    clock: fn() -> u64,
}

impl<S: RuleSource, E: RuleEngine, St: StateStore> Controller<S, E, St> {
    pub fn new(synchronizer: RuleSynchronizer<S, E>, store: St) -> Self {
        Self {
            synchronizer,
            store,
            clock: now_millis,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn synchronizer(&self) -> &RuleSynchronizer<S, E> {
        &self.synchronizer
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Install/startup hook: apply the persisted flag.
    pub fn activate(&mut self) -> Result<usize, SyncError> {
        let enabled = effective_enabled(&self.store);
        info!("activating with filtering {}", if enabled { "enabled" } else { "disabled" });
        self.synchronizer.synchronize(enabled)
    }

    pub fn handle(&mut self, message: &ControlMessage) -> ControlResponse {
        let stored = Some(effective_enabled(&self.store));
        match message.action(stored) {
            ControlAction::Pong => ControlResponse::pong((self.clock)()),
            ControlAction::Synchronize { enabled, persist } => {
                if persist {
                    if let Err(e) = self.store.save_enabled(enabled) {
                        warn!("failed to persist enabled flag: {e}");
                        return ControlResponse::failure(e.to_string());
                    }
                }
                match self.synchronizer.synchronize(enabled) {
                    Ok(count) => ControlResponse {
                        rules: Some(count),
                        ..ControlResponse::success()
                    },
                    Err(e) => ControlResponse::failure(e.to_string()),
                }
            }
        }
    }

    /// Parse and handle a raw message. Unknown messages fail without side
    /// effects.
    pub fn handle_json(&mut self, text: &str) -> ControlResponse {
        match ControlMessage::from_json(text) {
            Ok(message) => self.handle(&message),
            Err(e) => ControlResponse::failure(format!("unrecognized control message: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticSource;
    use crate::store::MemoryStateStore;
    use crate::sync::{MemoryRuleEngine, SyncConfig};

    fn controller(stored: Option<bool>) -> Controller<StaticSource, MemoryRuleEngine, MemoryStateStore> {
        let source = StaticSource::new(r#"[{"urlPattern": "ads.example.com"}, {"urlPattern": "track.example.com"}]"#);
        let sync = RuleSynchronizer::new(source, MemoryRuleEngine::default(), SyncConfig::default());
        Controller::new(sync, MemoryStateStore::new(stored)).with_clock(|| 1_700_000_000_000)
    }

    fn installed(c: &Controller<StaticSource, MemoryRuleEngine, MemoryStateStore>) -> usize {
        c.synchronizer().engine().len()
    }

    #[test]
    fn message_aliases() {
        for text in [r#"{"type": "set-enabled", "enabled": true}"#, r#"{"type": "SetEnabled", "enabled": true}"#] {
            assert_eq!(ControlMessage::from_json(text).unwrap(), ControlMessage::SetEnabled { enabled: true });
        }
        assert_eq!(ControlMessage::from_json(r#"{"type": "ReloadRules"}"#).unwrap(), ControlMessage::ReloadRules);
        assert_eq!(ControlMessage::from_json(r#"{"type": "ping"}"#).unwrap(), ControlMessage::Ping);
        assert_eq!(
            ControlMessage::from_json(r#"{"type": "set-enabled"}"#).unwrap(),
            ControlMessage::SetEnabled { enabled: false }
        );
    }

    #[test]
    fn activation_follows_stored_flag() {
        let mut c = controller(None);
        assert_eq!(c.activate().unwrap(), 2);
        assert_eq!(installed(&c), 2);

        let mut c = controller(Some(false));
        assert_eq!(c.activate().unwrap(), 0);
        assert_eq!(installed(&c), 0);
    }

    #[test]
    fn set_enabled_persists_then_syncs() {
        let mut c = controller(None);
        c.activate().unwrap();

        let response = c.handle_json(r#"{"type": "set-enabled", "enabled": false}"#);
        assert_eq!(response, ControlResponse { rules: Some(0), ..ControlResponse::success() });
        assert_eq!(c.store().load_enabled().unwrap(), Some(false));
        assert_eq!(installed(&c), 0);

        let response = c.handle(&ControlMessage::ReloadRules);
        assert!(response.ok);
        assert_eq!(installed(&c), 0);

        c.handle(&ControlMessage::SetEnabled { enabled: true });
        assert_eq!(installed(&c), 2);
    }

    #[test]
    fn ping_and_unknown_messages() {
        let mut c = controller(None);
        let pong = c.handle(&ControlMessage::Ping);
        assert_eq!(pong.timestamp, Some(1_700_000_000_000));
        assert_eq!(
            serde_json::to_value(&pong).unwrap(),
            serde_json::json!({"ok": true, "timestamp": 1_700_000_000_000u64})
        );

        let response = c.handle_json(r#"{"type": "self-destruct"}"#);
        assert!(!response.ok);
        assert!(response.error.unwrap().starts_with("unrecognized control message"));
        assert_eq!(installed(&c), 0);
    }
}
