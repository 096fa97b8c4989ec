use thiserror::Error;

/// Errors raised by a single RPC against a switch.
///
/// These are transient from the control loop's point of view: a failed
/// counter read abandons the current cycle for that device, a failed rule
/// mutation leaves the block state untouched, and the loop retries on the
/// next cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("RPC timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("transport error: {0}")]
    Transport(String),
    /// The device accepted the request but refused it (e.g. an entry that
    /// already exists, or a delete of an absent entry).
    #[error("rejected by device: {0}")]
    Rejected(String),
    #[error("session already closed")]
    SessionClosed,
}

/// Errors resolving symbolic pipeline names to the numeric identifiers the
/// device protocol requires.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unknown counter: {0}")]
    UnknownCounter(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Main crate error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Cannot establish a session or claim primacy. Fatal at startup: the
    /// process must not proceed with any device unreachable.
    #[error("connection to {device} ({address}) failed: {message}")]
    Connection {
        device: String,
        address: String,
        message: String,
    },

    /// An RPC failed against a connected device.
    #[error("RPC failure on {device}: {source}")]
    Rpc {
        device: String,
        #[source]
        source: RpcError,
    },

    #[error("schema resolution failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("required file not found: {0}")]
    MissingArtifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rpc(device: impl Into<String>, source: RpcError) -> Self {
        Error::Rpc {
            device: device.into(),
            source,
        }
    }

    pub fn connection(
        device: impl Into<String>,
        address: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Connection {
            device: device.into(),
            address: address.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
