//! # Core Identity Entities
//!
//! Identifiers shared by every crate that touches a flow session: the
//! session key, the flow key, and the holding identities of both parties.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Identifier of a session, shared by both parties.
///
/// Used as the log key for every record that concerns the session, so all
/// of a session's traffic lands on the same partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a flow instance in the flow-execution layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the flow id for the initiated side of a session.
    ///
    /// Deterministic in the session id, so replaying the same `SessionInit`
    /// always targets the same flow.
    pub fn for_initiated_session(session_id: &SessionId) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_str().as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A party taking part in a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct HoldingIdentity {
    /// X.500 distinguished name of the member.
    pub x500_name: String,
    /// Membership group the member belongs to.
    pub group_id: String,
}

impl HoldingIdentity {
    pub fn new(x500_name: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            x500_name: x500_name.into(),
            group_id: group_id.into(),
        }
    }
}

impl fmt::Display for HoldingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.x500_name, self.group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiated_flow_id_is_deterministic() {
        let session = SessionId::from("session-1");
        assert_eq!(
            FlowId::for_initiated_session(&session),
            FlowId::for_initiated_session(&session)
        );
        assert_ne!(
            FlowId::for_initiated_session(&session),
            FlowId::for_initiated_session(&SessionId::from("session-2"))
        );
    }

    #[test]
    fn test_holding_identity_display() {
        let alice = HoldingIdentity::new("O=Alice, L=London, C=GB", "group-1");
        assert_eq!(alice.to_string(), "O=Alice, L=London, C=GB@group-1");
    }
}
