use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("no input on channel {0}")]
    BadInputChannel(u32),
    #[error("no output on channel {0}")]
    BadOutputChannel(u32),
    #[error("no digital line on channel {0}")]
    BadDigitalChannel(u32),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
