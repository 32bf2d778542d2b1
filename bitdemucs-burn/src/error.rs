use burn::record::RecorderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BitDemucsError {
    #[error("Invalid resample factor {0}, should be 1, 2 or 4")]
    InvalidResample(usize),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Record error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BitDemucsError>;
