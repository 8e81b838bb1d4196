use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionStatus {
    Waiting,
    Running,
    Closed,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Waiting
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot go from {from} to {to}")]
pub struct StatusError {
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

impl ConnectionStatus {
    pub fn accept_login(&mut self) -> Result<(), StatusError> {
        self.go(ConnectionStatus::Running, |from| from == ConnectionStatus::Waiting)
    }

    /// `Closed` is terminal. Closing before a login is accepted is allowed too.
    pub fn close(&mut self) -> Result<(), StatusError> {
        self.go(ConnectionStatus::Closed, |from| from != ConnectionStatus::Closed)
    }

    pub fn is_closed(&self) -> bool {
        *self == ConnectionStatus::Closed
    }

    fn go(&mut self, to: ConnectionStatus, allowed: impl FnOnce(ConnectionStatus) -> bool) -> Result<(), StatusError> {
        if !allowed(*self) {
            return Err(StatusError { from: *self, to });
        }
        log::info!("connection status: {} -> {}", self, to);
        *self = to;
        Ok(())
    }
}
