use thiserror::Error;

/// The exchange itself failed. Everything except `Malformed` ends the session.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("server is unreachable: {0}")]
    Unreachable(String),
    #[error("server failed with status {0}")]
    Server(u16),
    #[error("malformed reply body: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GatewayError::Malformed(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_server_error() => GatewayError::Server(status.as_u16()),
            _ => GatewayError::Unreachable(e.to_string()),
        }
    }
}

/// The server understood the request and refused it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("the ticker is unknown")]
    UnknownTicker,
    #[error("the stock is not in the watchlist")]
    NotWatched,
    #[error("the owned amount is not enough")]
    NotEnoughStock,
    #[error("the order has already expired")]
    ExpiredOrder,
    #[error("the client is unknown")]
    UnknownClient,
    #[error("the request was malformed")]
    InvalidMessage,
    #[error("unexpected status {0}")]
    Unexpected(u16),
}
