use thiserror::Error;

/// Failure taxonomy shared by every layer of the stack.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{table} table is full (capacity {capacity})")]
    ResourceExhausted { table: &'static str, capacity: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid state: {0}")]
    StateViolation(String),

    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("channel to {0} disconnected")]
    Disconnected(&'static str),

    #[error("driver i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        NetError::InvalidArgument(msg.into())
    }

    pub fn violation(msg: impl Into<String>) -> Self {
        NetError::ProtocolViolation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        NetError::NotFound(what.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        NetError::StateViolation(msg.into())
    }

    pub fn full(table: &'static str, capacity: usize) -> Self {
        NetError::ResourceExhausted { table, capacity }
    }
}
