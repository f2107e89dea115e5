//! Identifiers for agents and fires.
//!
//! Both identifiers carry total orders: the order on [`AgentId`] elects the
//! auction announcer and breaks Ricart-Agrawala request ties, so it must be
//! the same on every process.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An agent identifier was empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent id must be a non-empty string")]
pub struct EmptyAgentId;

/// Unique identifier for an agent (one truck or observer process).
///
/// Non-empty by construction; decoding an empty `from` field is a decode
/// failure, not a panic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Create an agent id, rejecting the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyAgentId> {
        let id = id.into();
        if id.is_empty() {
            return Err(EmptyAgentId);
        }
        Ok(Self(id))
    }

    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentId {
    type Error = EmptyAgentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a fire: the `(x, y)` cell it burns on.
///
/// A re-ignited cell bears the same id as the fire before it; every fresh
/// announcement opens a fresh auction window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FireId {
    pub x: i32,
    pub y: i32,
}

impl FireId {
    /// Create a fire id for the given cell.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance from a position to this fire.
    pub fn manhattan(&self, row: i32, col: i32) -> u32 {
        self.x.abs_diff(row) + self.y.abs_diff(col)
    }
}

impl fmt::Display for FireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}
