//! Branded ID newtypes.
//!
//! Agents, LLM turns and tool invocations each get a distinct id type so a
//! call id can never be passed where a response id is expected. Agent ids are
//! generated locally (UUID v7); response and call ids normally come from the
//! LLM service and are wrapped with [`From`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identity of one agent instance (orchestrator or sub-agent).
    AgentId
}

branded_id! {
    /// Identifier of one LLM turn, issued by the service at `response.created`.
    ResponseId
}

branded_id! {
    /// Identifier of one tool invocation requested by the LLM.
    CallId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        let a = AgentId::new();
        let b = AgentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn new_ids_are_uuid_v7() {
        let id = AgentId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn from_str_round_trips() {
        let id = ResponseId::from("resp_abc");
        assert_eq!(id.as_str(), "resp_abc");
        assert_eq!(String::from(id), "resp_abc");
    }

    #[test]
    fn serializes_transparently() {
        let id = CallId::from("call_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"call_1\"");
        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_deref() {
        let id = AgentId::from("agent-x");
        assert_eq!(format!("{id}"), "agent-x");
        assert!(id.starts_with("agent"));
    }
}
