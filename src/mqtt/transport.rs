use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::mqtt::discovery::Announcement;

/// Publish/keepalive primitives of the broker session.
///
/// Implementations bound every call with their own timeout; none may
/// block the tick indefinitely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// One connect attempt, replacing any previous session
    async fn connect(&mut self) -> Result<(), TransportError>;

    fn is_up(&self) -> bool;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Cheap per-tick servicing of the session
    async fn keepalive(&mut self) -> Result<(), TransportError>;

    /// Broker round trip used by the periodic health check
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Publish every discovery config retained, returning how many went out.
    ///
    /// A rejected config is skipped; a lost connection aborts the run.
    async fn announce_schema(
        &mut self,
        announcements: &[Announcement],
    ) -> Result<usize, TransportError> {
        let mut sent = 0;
        for announcement in announcements {
            match self
                .publish(&announcement.topic, &announcement.payload, true)
                .await
            {
                Ok(()) => {
                    debug!("Discovery config published to {}", announcement.topic);
                    sent += 1;
                }
                Err(err) if err.is_connection_loss() => return Err(err),
                Err(err) => {
                    warn!("Failed to publish discovery to {}: {}", announcement.topic, err);
                }
            }
        }
        Ok(sent)
    }
}
