//! Error types for redraft.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedraftError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Endpoint / transport errors
    #[error("Invalid endpoint URL '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Endpoint returned HTTP {status}: {body}")]
    EndpointStatus { status: u16, body: String },

    // Prompt template errors
    #[error("Prompt template missing required placeholder {placeholder}")]
    TemplateMissingPlaceholder { placeholder: String },

    // Input / output errors
    #[error("Input file not found: {path}")]
    InputNotFound { path: String },

    #[error("No earlier stage output matching '{prefix}*' found in {dir}")]
    NoStageOutput { prefix: String, dir: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, RedraftError>;
