//! Sends commands to a running daemon.

use crate::daemon::{Command, Response};
use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error as ThisError;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error("Could not communicate with daemon, check that it is running: {0}")]
    Io(#[from] io::Error),
    #[error("The daemon did not answer within {0:?}")]
    TimedOut(Duration),
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct Client {
    daemon: SocketAddr,
    timeout: Duration,
}

impl Client {
    pub fn new(daemon: SocketAddr, timeout: Duration) -> Self {
        Self { daemon, timeout }
    }

    pub async fn send(&self, command: &Command) -> Result<Response, ClientError> {
        let bytes = serde_json::to_vec(command)?;
        self.send_raw(&bytes).await
    }

    /// Sends an already encoded command and waits for the reply.
    pub async fn send_raw(&self, datagram: &[u8]) -> Result<Response, ClientError> {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await?;
        socket.send_to(datagram, self.daemon).await?;
        tracing::debug!(daemon = %self.daemon, "command sent");

        let mut buffer = vec![0; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buffer))
            .await
            .map_err(|_| ClientError::TimedOut(self.timeout))??;
        Ok(serde_json::from_slice(&buffer[..len])?)
    }
}
