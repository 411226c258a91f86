use std::sync::Arc;
use thiserror::Error;

/// Unified error type for the highway DNS server and checkpoint producer
#[derive(Debug, Clone, Error)]
pub enum HighwayError {
    // IO errors
    #[error("IO error: {0}")]
    Io(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("No nameservers specified for the zone")]
    NoNameservers,

    // Key material errors
    #[error("Unsupported key type: {0}")]
    UnsupportedKey(String),
    #[error("Failed to parse private key: {0}")]
    KeyParseFailure(String),

    // Signer errors
    #[error("Record set header mismatch: {0}")]
    HeaderMismatch(String),
    #[error("Failed to sign record set")]
    SignFailure,
    #[error("Signing task is not running")]
    SignerClosed,

    // DNS wire errors
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Invalid question section")]
    InvalidQuestionSection,
    #[error("Invalid resource record")]
    InvalidResourceRecord,
    #[error("Invalid bit stream: {0}")]
    InvalidBitStream(String),

    // State persistence errors
    #[error("State file error: {0}")]
    StateFile(String),

    // Checkpoint errors
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
    #[error("Chain reorganized past published checkpoint: {0}")]
    ChainReorgPastCheckpoint(String),
    #[error("Blockchain RPC error: {0}")]
    Rpc(String),

    // Publication backend errors
    #[error("Backend publish error: {0}")]
    BackendPublish(String),
    #[error("Unknown checkpoint method: {0}")]
    UnknownMethod(String),
}

impl From<std::io::Error> for HighwayError {
    fn from(err: std::io::Error) -> Self {
        HighwayError::IoError(Arc::new(err))
    }
}

impl From<crate::dns::ParseError> for HighwayError {
    fn from(err: crate::dns::ParseError) -> Self {
        use crate::dns::ParseError;
        match err {
            ParseError::InvalidHeader => HighwayError::InvalidHeader,
            ParseError::InvalidLabel => HighwayError::InvalidLabel,
            ParseError::InvalidQuestionSection => HighwayError::InvalidQuestionSection,
            ParseError::InvalidResourceRecord => HighwayError::InvalidResourceRecord,
            ParseError::InvalidBitStream(s) => HighwayError::InvalidBitStream(s),
        }
    }
}

impl From<reqwest::Error> for HighwayError {
    fn from(err: reqwest::Error) -> Self {
        HighwayError::Rpc(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HighwayError>;
