use thiserror::Error;

/// Error type shared by the condition engine and its collaborators.
#[derive(Error, Debug)]
pub enum ConditionError {
    /// A method other than Enable or Disable was invoked on a disabled condition
    #[error("Condition disabled: {0}")]
    ConditionDisabled(String),

    /// Acknowledge, Confirm or AddComment referenced a stale or unknown occurrence
    #[error("Invalid event id for condition {0}")]
    InvalidEventId(String),

    /// The method is not valid in the condition's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An argument failed validation (e.g. shelving duration out of range)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown condition identity
    #[error("Condition not found: {0}")]
    NotFound(String),

    /// A condition with the same identity is already registered
    #[error("Condition already exists: {0}")]
    AlreadyExists(String),

    /// The condition's worker has stopped and no longer accepts commands
    #[error("Condition worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The condition's command queue is full; the sample was dropped
    #[error("Condition queue full: {0}")]
    QueueFull(String),

    /// Requested signal was not found on the bus
    #[error("Signal not found: {0}")]
    SignalNotFound(String),

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attribute store rejected a read or write
    #[error("Attribute store error: {0}")]
    Attribute(String),

    /// Metrics exporter failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while reading or writing snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConditionError {
    /// Status code reported across the method-invocation boundary.
    pub fn status_code(&self) -> &'static str {
        match self {
            ConditionError::ConditionDisabled(_) => "Bad_ConditionDisabled",
            ConditionError::InvalidEventId(_) => "Bad_EventIdUnknown",
            ConditionError::InvalidState(_) => "Bad_InvalidState",
            ConditionError::InvalidArgument(_) => "Bad_InvalidArgument",
            ConditionError::NotFound(_) | ConditionError::SignalNotFound(_) => "Bad_NodeIdUnknown",
            ConditionError::AlreadyExists(_) => "Bad_NodeIdExists",
            ConditionError::TypeMismatch { .. } => "Bad_TypeMismatch",
            _ => "Bad_InternalError",
        }
    }
}

/// Convenient alias over [`Result`] using [`ConditionError`]
pub type Result<T> = std::result::Result<T, ConditionError>;
