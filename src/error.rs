// src/error.rs

/// Errors surfaced by discovery construction and resource transports.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("Invalid discovery URI {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unknown discovery scheme: {0}")]
    UnknownScheme(String),

    #[error("Discovery URI {0} has no host")]
    MissingHost(String),

    #[error("Discovery URI {0} has no port")]
    MissingPort(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Request failed: {0}")]
    Request(#[from] hyper::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Lookup failed: {0}")]
    Lookup(String),
}

pub type Result<T, E = DiscoverError> = std::result::Result<T, E>;
