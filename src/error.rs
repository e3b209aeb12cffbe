use thiserror::Error;

/// Startup and process-level failures.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Telegram bot error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Persistence failures surfaced by the policy and vehicle stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("policy {0} already exists")]
    DuplicatePolicy(String),

    #[error("vehicle already registered: {0}")]
    DuplicateVehicle(String),

    #[error("invalid data: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("vision service is not configured")]
    NotConfigured,

    #[error("vision service temporarily unavailable (circuit open)")]
    CircuitOpen,

    #[error("vision request timed out")]
    Timeout,

    #[error("vision client error: {0}")]
    Client(#[from] vision_client::Error),

    #[error("invalid vision response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("file download failed: {0}")]
    Download(String),

    #[error("{0}")]
    Other(String),
}

/// Error type returned by every flow handler.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A handler was reached without the state it requires.
    #[error("flow invariant violated: {0}")]
    Invariant(String),
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;
