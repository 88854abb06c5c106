use crate::protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("unsupported settings version {found}, expected {expected}")]
    SettingsVersion { found: u32, expected: u32 },

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("station index {0} out of range")]
    InvalidIndex(usize),

    #[error("station hash 0 is reserved")]
    ZeroHash,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
