use thiserror::Error;

/// The full error taxonomy shared by every public operation in the core.
///
/// Each variant carries a stable `kind()` string (used by callers for
/// machine matching) plus a human-readable message via `thiserror`'s
/// `Display`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("resource limit exceeded: {0}")]
    Resource(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl CoreError {
    /// Stable machine-readable discriminant, independent of the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::NotFound(_) => "not_found",
            Self::State(_) => "state",
            Self::Resource(_) => "resource",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Storage(_) => "storage",
            Self::Cancelled(_) => "cancelled",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_regardless_of_message() {
        let a = CoreError::not_found("device d1");
        let b = CoreError::not_found("command c2");
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.kind(), "not_found");
    }

    #[test]
    fn each_variant_has_distinct_kind() {
        let kinds = [
            CoreError::Protocol("x".into()).kind(),
            CoreError::NotFound("x".into()).kind(),
            CoreError::State("x".into()).kind(),
            CoreError::Resource("x".into()).kind(),
            CoreError::Timeout("x".into()).kind(),
            CoreError::Transport("x".into()).kind(),
            CoreError::Storage("x".into()).kind(),
            CoreError::Cancelled("x".into()).kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
