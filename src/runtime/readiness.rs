use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{net::TcpStream, time};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("port {port} not accepting connections after {waited_ms}ms: {last_error}")]
    ReadinessTimeout {
        port: u16,
        waited_ms: u64,
        last_error: String,
    },
}

/// Poll a TCP connect to `localhost` until the port accepts or `timeout` elapses.
///
/// `localhost` is used rather than a literal address so renderers bound to either
/// loopback family are detected.
pub async fn wait_until_ready(port: u16, timeout: Duration) -> Result<(), ReadinessError> {
    let started_at = Instant::now();
    let deadline = started_at + timeout;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt_budget = remaining.min(CONNECT_TIMEOUT);
        let last_error = match time::timeout(
            attempt_budget,
            TcpStream::connect(("localhost", port)),
        )
        .await
        {
            Ok(Ok(_stream)) => {
                debug!(
                    target = "runtime::readiness",
                    op = "wait_until_ready",
                    result = "ready",
                    port,
                    attempts,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Renderer port accepting connections"
                );
                return Ok(());
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => String::from("connect attempt timed out"),
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(ReadinessError::ReadinessTimeout {
                port,
                waited_ms: started_at.elapsed().as_millis() as u64,
                last_error,
            });
        }
        time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Seam the supervisor uses to decide when a freshly spawned renderer is serving.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn wait_until_ready(&self, port: u16, timeout: Duration) -> Result<(), ReadinessError>;
}

/// Production probe: loopback TCP connect polling.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpReadiness;

#[async_trait]
impl ReadinessProbe for TcpReadiness {
    async fn wait_until_ready(&self, port: u16, timeout: Duration) -> Result<(), ReadinessError> {
        wait_until_ready(port, timeout).await
    }
}
