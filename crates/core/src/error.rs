//! Error types for Questlog

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuestlogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Console registry error: {0}")]
    Registry(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, QuestlogError>;
