use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StopkranError {
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("failed to bind socket at {path}: {reason}")]
    Bind { path: PathBuf, reason: String },

    #[error("transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("transport degraded: {reason}")]
    TransportDegraded { reason: String },

    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("daemon timeout after {timeout_secs}s")]
    DaemonTimeout { timeout_secs: u64 },

    #[error("ipc error: {reason}")]
    Ipc { reason: String },

    #[error("socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api error: status={status}, body={body}")]
    Api { status: u16, body: String },
}

impl StopkranError {
    /// Whether a dispatch failure means the messaging service is unreachable,
    /// as opposed to a local bug.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            StopkranError::TransportUnavailable { .. }
                | StopkranError::TransportDegraded { .. }
                | StopkranError::Http(_)
                | StopkranError::Api { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StopkranError>;
