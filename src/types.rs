//! Basic type definitions for the relay
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: name-derived session identifier (e.g. `ecAli-x9Qz`)
//! - `TypingState`: typing indicator on/off

/// Session identifier (newtype pattern)
///
/// Built by the `IdentityGenerator` from a display name and a random
/// suffix. Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typing indicator state carried by `__TYPING__:` control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    On,
    Off,
}

impl TypingState {
    /// Wire value (`on` / `off`)
    pub fn as_str(self) -> &'static str {
        match self {
            TypingState::On => "on",
            TypingState::Off => "off",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        let id = SessionId::from("ecilA-ab12");
        assert_eq!(id.to_string(), "ecilA-ab12");
        assert_eq!(id.as_str(), "ecilA-ab12");
    }

    #[test]
    fn test_typing_state_wire_value() {
        assert_eq!(TypingState::On.as_str(), "on");
        assert_eq!(TypingState::Off.as_str(), "off");
    }
}
