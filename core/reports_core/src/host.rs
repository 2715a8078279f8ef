//! Types shared with the host game server: accounts, sessions and the effects
//! the host applies on our behalf.

use std::{collections::HashMap, sync::RwLock};

use serde::{Deserialize, Serialize};

use crate::report::Position;

/// Host-assigned id of one connected client (player or server console).
pub type SessionId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
}

/// Read access to the host's registered accounts.
pub trait AccountDirectory: Send + Sync {
    /// Accounts whose name matches `name`. An exact case-insensitive match is
    /// returned alone; otherwise every case-insensitive prefix match is. A blank
    /// name matches nobody.
    fn find_by_name(&self, name: &str) -> Vec<Account>;

    fn name_of(&self, id: i64) -> Option<String>;
}

/// Account directory fed by the host through `/accounts` and session logins.
#[derive(Default)]
pub struct InMemoryAccounts {
    by_id: RwLock<HashMap<i64, Account>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, account: Account) {
        let mut by_id = self.by_id.write().unwrap_or_else(|e| e.into_inner());
        by_id.insert(account.id, account);
    }

    pub fn len(&self) -> usize {
        self.by_id.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountDirectory for InMemoryAccounts {
    fn find_by_name(&self, name: &str) -> Vec<Account> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let by_id = self.by_id.read().unwrap_or_else(|e| e.into_inner());

        if let Some(exact) = by_id.values().find(|a| a.name.to_lowercase() == needle) {
            return vec![exact.clone()];
        }

        let mut out: Vec<Account> = by_id
            .values()
            .filter(|a| a.name.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn name_of(&self, id: i64) -> Option<String> {
        let by_id = self.by_id.read().unwrap_or_else(|e| e.into_inner());
        by_id.get(&id).map(|a| a.name.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Error,
    Warning,
    Info,
    ChatWatch,
}

/// Something the host must do once a command or event has been handled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Message {
        session: SessionId,
        tone: Tone,
        text: String,
    },
    Teleport {
        session: SessionId,
        position: Position,
    },
}

/// Collects the replies for one command invocation.
pub(crate) struct Replies {
    session: SessionId,
    out: Vec<Effect>,
}

impl Replies {
    pub(crate) fn new(session: SessionId) -> Self {
        Replies {
            session,
            out: Vec::new(),
        }
    }

    pub(crate) fn send(&mut self, tone: Tone, text: impl Into<String>) {
        self.out.push(Effect::Message {
            session: self.session,
            tone,
            text: text.into(),
        });
    }

    pub(crate) fn success(&mut self, text: impl Into<String>) {
        self.send(Tone::Success, text);
    }

    pub(crate) fn error(&mut self, text: impl Into<String>) {
        self.send(Tone::Error, text);
    }

    pub(crate) fn warning(&mut self, text: impl Into<String>) {
        self.send(Tone::Warning, text);
    }

    pub(crate) fn info(&mut self, text: impl Into<String>) {
        self.send(Tone::Info, text);
    }

    /// A message to some other session (staff broadcast).
    pub(crate) fn notify(&mut self, session: SessionId, tone: Tone, text: impl Into<String>) {
        self.out.push(Effect::Message {
            session,
            tone,
            text: text.into(),
        });
    }

    pub(crate) fn teleport(&mut self, position: Position) {
        self.out.push(Effect::Teleport {
            session: self.session,
            position,
        });
    }

    pub(crate) fn into_effects(self) -> Vec<Effect> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(names: &[(i64, &str)]) -> InMemoryAccounts {
        let accounts = InMemoryAccounts::new();
        for (id, name) in names {
            accounts.upsert(Account {
                id: *id,
                name: name.to_string(),
            });
        }
        accounts
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        let accounts = directory(&[(1, "Griefer"), (2, "Builder"), (3, "grinch")]);
        let names: Vec<String> = accounts
            .find_by_name("GRI")
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Griefer", "grinch"]);
        assert!(accounts.find_by_name("nobody").is_empty());
    }

    #[test]
    fn blank_name_matches_nobody() {
        let accounts = directory(&[(1, "Griefer")]);
        assert!(accounts.find_by_name("").is_empty());
        assert!(accounts.find_by_name("  ").is_empty());
    }

    #[test]
    fn exact_name_beats_longer_prefixes() {
        let accounts = directory(&[(1, "Bob"), (2, "Bobby")]);
        assert_eq!(accounts.find_by_name("bob"), vec![Account { id: 1, name: "Bob".into() }]);
        assert_eq!(accounts.name_of(2).as_deref(), Some("Bobby"));
        assert_eq!(accounts.name_of(9), None);
    }

    #[test]
    fn effects_serialize_with_type_tag() {
        let effect = Effect::Message {
            session: 3,
            tone: Tone::ChatWatch,
            text: "hi".into(),
        };
        assert_eq!(
            serde_json::to_value(&effect).unwrap(),
            serde_json::json!({"type": "message", "session": 3, "tone": "chat_watch", "text": "hi"})
        );
    }
}
