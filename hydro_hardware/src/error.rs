use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("probe timeout")]
    Timeout,
    #[error("no output configured for channel {0}")]
    UnknownChannel(u8),
    #[error("replay source is empty")]
    EmptyReplay,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
