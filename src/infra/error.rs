use std::net::SocketAddr;

use thiserror::Error;

/// Failures while standing up the process: sockets, the SQLite pool, outbound
/// HTTP clients and logging.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("could not listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener on {addr} stopped")]
    Serve {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("http client could not be built: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("tracing subscriber already installed or invalid: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }

    pub fn serve(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Serve { addr, source }
    }
}
