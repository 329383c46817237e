use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
