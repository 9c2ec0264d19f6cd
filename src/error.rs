use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeErrorCode {
    InvalidNamespace,
    SyncInProgress,
    UnknownTable,
    InvalidFilter,
    InvalidQuery,
    SchemaNotFound,
    Serialization,
    Execution,
    BufferOverflow,
    Cancelled,
    InvalidConfig,
    Io,
    Encode,
    Decode,
}

impl ModeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ModeErrorCode::InvalidNamespace => "invalid_namespace",
            ModeErrorCode::SyncInProgress => "sync_in_progress",
            ModeErrorCode::UnknownTable => "unknown_table",
            ModeErrorCode::InvalidFilter => "invalid_filter",
            ModeErrorCode::InvalidQuery => "invalid_query",
            ModeErrorCode::SchemaNotFound => "schema_not_found",
            ModeErrorCode::Serialization => "serialization",
            ModeErrorCode::Execution => "execution",
            ModeErrorCode::BufferOverflow => "buffer_overflow",
            ModeErrorCode::Cancelled => "cancelled",
            ModeErrorCode::InvalidConfig => "invalid_config",
            ModeErrorCode::Io => "io",
            ModeErrorCode::Encode => "encode",
            ModeErrorCode::Decode => "decode",
        }
    }

    /// Whether a caller may reasonably resubmit the same request later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ModeErrorCode::SyncInProgress)
    }
}

#[derive(Debug, Error)]
pub enum ModeError {
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("cannot process request while chain {chain_id} is syncing")]
    SyncInProgress { chain_id: u64 },
    #[error("table '{table}' not found in namespace '{namespace}'")]
    UnknownTable { namespace: String, table: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("no schema for table '{table}' in namespace '{namespace}'")]
    SchemaNotFound { namespace: String, table: String },
    #[error("serialization error in table '{table}': {message}")]
    Serialization { table: String, message: String },
    #[error("execution error: {0}")]
    Execution(String),
    #[error("stream buffer overflow: {buffered} rows buffered, limit {limit}")]
    BufferOverflow { buffered: usize, limit: usize },
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ModeError {
    pub fn code(&self) -> ModeErrorCode {
        match self {
            ModeError::InvalidNamespace(_) => ModeErrorCode::InvalidNamespace,
            ModeError::SyncInProgress { .. } => ModeErrorCode::SyncInProgress,
            ModeError::UnknownTable { .. } => ModeErrorCode::UnknownTable,
            ModeError::InvalidFilter(_) => ModeErrorCode::InvalidFilter,
            ModeError::InvalidQuery(_) => ModeErrorCode::InvalidQuery,
            ModeError::SchemaNotFound { .. } => ModeErrorCode::SchemaNotFound,
            ModeError::Serialization { .. } => ModeErrorCode::Serialization,
            ModeError::Execution(_) => ModeErrorCode::Execution,
            ModeError::BufferOverflow { .. } => ModeErrorCode::BufferOverflow,
            ModeError::Cancelled => ModeErrorCode::Cancelled,
            ModeError::InvalidConfig { .. } => ModeErrorCode::InvalidConfig,
            ModeError::Io(_) => ModeErrorCode::Io,
            ModeError::Encode(_) => ModeErrorCode::Encode,
            ModeError::Decode(_) => ModeErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub(crate) fn serialization(table: &str, message: impl Into<String>) -> Self {
        ModeError::Serialization {
            table: table.to_string(),
            message: message.into(),
        }
    }
}
