use std::io;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("received packet truncated (type {tag}, needed {needed} bytes, {remaining} left)")]
    TruncatedPacket {
        tag: u8,
        needed: usize,
        remaining: usize,
    },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
    #[error("disconnected: {reason}")]
    TransportDisconnected { code: u32, reason: &'static str },
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("invalid write ({end} should be less than or equal to {len})")]
    InvalidWrite { end: usize, len: usize },
    #[error("map decoder failed: {0}")]
    MapDecode(String),
    #[error("demo i/o error: {0}")]
    DemoIo(io::Error),
    #[error("unsupported demo file: {0}")]
    DemoFormat(String),
    #[error("demo ended: end of recording reached")]
    DemoEnded,
    #[error("playback speed {0} out of range")]
    InvalidSpeed(f32),
    #[error("invalid server address: {0}")]
    InvalidAddress(String),
    #[error("not connected")]
    NotConnected,
}

impl NetError {
    pub fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub fn invalid_ref(message: impl Into<String>) -> Self {
        Self::InvalidReference(message.into())
    }

    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::TruncatedPacket { .. })
    }
}

pub type NetResult<T> = Result<T, NetError>;
