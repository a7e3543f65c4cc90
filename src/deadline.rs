use crate::{GrabError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// One absolute point in time after which every I/O on a connection fails.
///
/// Computed once at dial time and carried by the connection, so every read,
/// write and handshake shares the same budget instead of getting its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run one I/O future under the deadline.
    ///
    /// An already elapsed deadline fails before the future is polled.
    pub async fn run<F, T, E>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<GrabError>,
    {
        if self.has_elapsed() {
            return Err(GrabError::timeout(operation));
        }
        match timeout_at(self.at, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(GrabError::timeout(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elapsed_deadline_fails_without_polling() {
        let deadline = Deadline::after(Duration::ZERO);
        let mut polled = false;
        let result = deadline
            .run("read", async {
                polled = true;
                Ok::<_, std::io::Error>(())
            })
            .await;
        assert!(matches!(result, Err(GrabError::Timeout { ref operation }) if operation == "read"));
        assert!(!polled);
    }

    #[tokio::test]
    async fn test_pending_io_times_out_at_deadline() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let result = deadline
            .run("write", std::future::pending::<std::io::Result<usize>>())
            .await;
        assert!(result.unwrap_err().is_timeout());
        assert!(deadline.has_elapsed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_completed_io_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let n = deadline
            .run("read", async { Ok::<_, std::io::Error>(7usize) })
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert!(deadline.remaining() > Duration::ZERO);
    }
}
