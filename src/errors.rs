use thiserror::Error;

/// Errors raised by the transport client while talking to an authoritative server.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("timed out talking to {0}")]
    Timeout(std::net::IpAddr),
    #[error("io error talking to {addr}: {source}")]
    Io { addr: std::net::IpAddr, #[source] source: std::io::Error },
    #[error("could not decode response from {addr}: {source}")]
    Protocol { addr: std::net::IpAddr, #[source] source: hickory_proto::error::ProtoError },
}

/// Errors raised by the iterative resolution engine.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("could not resolve {0}: {1}")]
    ResolveFailed(String, String),
    #[error("exceeded the {0}-send work budget while resolving {1}")]
    Overrun(u32, String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ResolveError {
    pub(crate) fn failed(name: &str, reason: impl Into<String>) -> Self {
        ResolveError::ResolveFailed(name.to_string(), reason.into())
    }
}

/// Errors raised while handling one incoming UDP datagram.
#[derive(Error, Debug)]
pub enum FrontEndError {
    #[error("question type {0} is not supported")]
    UnsupportedQuestionType(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("malformed request: {0}")]
    Malformed(#[from] hickory_proto::error::ProtoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading the static configuration file at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed config line {line_no} in {path}: {line:?}")]
    Malformed { path: String, line_no: usize, line: String },
    #[error("invalid address on line {line_no} of {path}: {line:?}")]
    InvalidAddress { path: String, line_no: usize, line: String },
}
