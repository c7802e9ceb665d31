//! Error types for the broadcast pipeline

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to open source file {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    #[error("No decodable audio track in source")]
    NoAudioTrack,

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Resampler initialization failed: {0}")]
    ResamplerInit(String),

    #[error("No output device available")]
    NoOutputDevice,

    #[error("Failed to open output stream: {0}")]
    StreamError(String),
}

/// Wire framing and payload errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unsupported message type: {0:#x}")]
    UnknownTag(u64),

    #[error("Malformed payload for tag {tag:#x}: {reason}")]
    MalformedPayload { tag: u64, reason: String },

    #[error("Payload length {0} exceeds limit")]
    OversizedPayload(u64),

    #[error("Failed to serialize message: {0}")]
    Serialize(String),

    #[error("Stream closed mid-frame")]
    TruncatedStream,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Write to {addr} failed: {reason}")]
    WriteFailed { addr: String, reason: String },

    #[error("Gave up connecting after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
