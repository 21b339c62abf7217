use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures that end an instance server or one of its connections.
///
/// Protocol mistakes made by a client are not errors at this level; they are
/// answered in-band with an `e:` line.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    #[error("port range overflows: base {base} + index {index}")]
    PortOverflow { base: u16, index: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
