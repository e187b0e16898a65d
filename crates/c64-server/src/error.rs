use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid allow-list entry '{0}'")]
    InvalidAllowEntry(String),

    #[error("terminal {address} is gone")]
    LinkClosed { address: SocketAddr },

    #[error("terminal {address} is not draining its output")]
    LinkBackedUp { address: SocketAddr },
}

pub type Result<T> = std::result::Result<T, ServerError>;
