//! Crate-wide error type.
//!
//! Mirrors the error kinds of the design: fatal setup errors, protocol
//! errors, and the two WAL-read failure modes, both of which end the sender
//! cleanly rather than escalate.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot connect now: server is still starting up or recovering")]
    CannotConnectNow,
    #[error("too many senders: no free slot in the slot table")]
    TooManySenders,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("requested WAL range has been removed (segment {0})")]
    WalRemoved(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    TransportClosed,
    #[error("supervisor is no longer alive")]
    SupervisorGone,
    #[error("unhandled error: {error}, in {context}")]
    Unhandled {
        error: Box<dyn std::error::Error + Send + Sync + 'static>,
        context: String,
    },
}

impl Error {
    pub fn unhandled(e: impl std::error::Error + Send + Sync + 'static, ctx: impl Into<String>) -> Self {
        Self::Unhandled {
            error: Box::new(e),
            context: ctx.into(),
        }
    }

    /// Whether this error should end the sender cleanly (exit 0, no error
    /// propagated back over the wire beyond what has already been sent) as
    /// opposed to being a setup-time fatal condition.
    pub fn ends_cleanly(&self) -> bool {
        matches!(self, Error::WalRemoved(_) | Error::Io(_) | Error::TransportClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
