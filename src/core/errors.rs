// src/core/errors.rs

//! Defines the primary error type for the failover client.

use thiserror::Error;

/// The main error enum, representing all possible failures while talking to
/// the monitored Valkey instances.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum VigilError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An `-ERR ...` reply returned by the server.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected reply to '{0}' command")]
    UnexpectedReply(String),

    #[error("Missing key in INFO response: {0}")]
    MissingInfoKey(String),

    #[error("Node is not connected")]
    NotConnected,

    #[error("Invalid TLS server name \"{0}\"")]
    InvalidServerName(String),
}
