//! Link and session lifecycle.
//!
//! The manager owns the link and transport collaborators; the flags they
//! drive live in [`ConnectivityState`], which the scheduler owns and lends
//! to every call.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::link::Link;
use crate::mqtt::{Announcement, RetryPolicy, SessionStats, Transport};
use crate::state::ConnectivityState;

/// Result of a session establishment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A new session was opened and announced
    Connected,
    AlreadyUp,
    /// Skipped, no link to connect over
    LinkDown,
    Failed,
}

impl SessionOutcome {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Connected | Self::AlreadyUp)
    }
}

/// What a periodic health check observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheck {
    pub link_changed: bool,
    pub session_changed: bool,
    pub reconnected: bool,
}

impl HealthCheck {
    /// Any transition (or a fresh session) warrants an out-of-band status
    pub fn needs_status_report(&self) -> bool {
        self.link_changed || self.session_changed || self.reconnected
    }
}

pub struct ConnectivityManager<L, T> {
    link: L,
    transport: T,
    retry: RetryPolicy,
    announcements: Vec<Announcement>,
    stats: SessionStats,
}

impl<L: Link, T: Transport> ConnectivityManager<L, T> {
    pub fn new(link: L, transport: T, retry: RetryPolicy, announcements: Vec<Announcement>) -> Self {
        Self {
            link,
            transport,
            retry,
            announcements,
            stats: SessionStats::new(),
        }
    }

    /// Bring the link up, polling a bounded number of times
    pub async fn ensure_link(&mut self, state: &mut ConnectivityState) -> bool {
        if self.link.is_up().await {
            state.mark_link_up();
            return true;
        }

        info!("Link down, connecting...");
        if let Err(err) = self.link.connect().await {
            warn!("Link connect failed: {}", err);
            state.mark_link_down();
            return false;
        }

        let mut attempt = 0;
        while self.retry.should_continue(attempt) {
            attempt += 1;
            if let Some(delay) = self.retry.delay_for_attempt(attempt) {
                tokio::time::sleep(delay).await;
            }
            if self.link.is_up().await {
                info!("Link up after {} attempt(s)", attempt);
                state.mark_link_up();
                return true;
            }
            debug!("Link attempt {}/{}", attempt, self.retry.max_attempts());
        }

        warn!("Failed to bring link up after {} attempts", attempt);
        state.mark_link_down();
        false
    }

    /// One session connect attempt; never touches the transport without a link
    pub async fn ensure_session(&mut self, state: &mut ConnectivityState) -> SessionOutcome {
        if !state.link_up() {
            debug!("Link down, skipping MQTT connect");
            return SessionOutcome::LinkDown;
        }
        if state.session_up() {
            if self.transport.is_up() {
                return SessionOutcome::AlreadyUp;
            }
            state.mark_session_down();
        }

        match self.transport.connect().await {
            Ok(()) => {
                state.mark_session_up();
                self.stats.record_success();
                info!(
                    "MQTT session established (connections: {}, reconnects: {})",
                    self.stats.total_connections(),
                    self.stats.total_reconnects()
                );
                self.announce(state).await;
                if state.session_up() {
                    SessionOutcome::Connected
                } else {
                    SessionOutcome::Failed
                }
            }
            Err(err) => {
                warn!("MQTT connection failed: {}", err);
                self.lose_session(state, &err);
                SessionOutcome::Failed
            }
        }
    }

    /// Publish the discovery config of every entity, returning how many went out
    pub async fn announce(&mut self, state: &mut ConnectivityState) -> usize {
        if !state.session_up() {
            debug!("MQTT not connected, skipping discovery config");
            return 0;
        }
        match self.transport.announce_schema(&self.announcements).await {
            Ok(sent) => {
                info!("Published {}/{} discovery configs", sent, self.announcements.len());
                sent
            }
            Err(err) => {
                warn!("Discovery announcement failed: {}", err);
                self.lose_session(state, &err);
                0
            }
        }
    }

    /// Per-tick session servicing; never reconnects
    pub async fn keepalive(&mut self, state: &mut ConnectivityState) -> bool {
        if !state.session_up() {
            return false;
        }
        match self.transport.keepalive().await {
            Ok(()) => true,
            Err(err) => {
                warn!("MQTT keepalive failed: {}", err);
                self.lose_session(state, &err);
                false
            }
        }
    }

    /// Fails closed without a session; a transport failure drops the session
    pub async fn publish(
        &mut self,
        state: &mut ConnectivityState,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> bool {
        if !state.session_up() {
            debug!("MQTT not connected, not publishing to {}", topic);
            return false;
        }
        match self.transport.publish(topic, payload, retain).await {
            Ok(()) => {
                debug!("Published {} to {} with retain={}", payload, topic, retain);
                true
            }
            Err(err) if err.is_connection_loss() => {
                warn!("Publish failed to {}: {}", topic, err);
                self.lose_session(state, &err);
                false
            }
            Err(err) => {
                warn!("Publish rejected for {}: {}", topic, err);
                false
            }
        }
    }

    /// Publish each item independently, stamping the batch time on the
    /// first success. Returns the number published.
    pub async fn publish_batch(
        &mut self,
        state: &mut ConnectivityState,
        items: &[(String, String)],
        retain: bool,
        now: Instant,
    ) -> usize {
        let mut published = 0;
        for (topic, payload) in items {
            if self.publish(state, topic, payload, retain).await {
                if published == 0 {
                    state.record_publish(now);
                }
                published += 1;
            }
        }
        published
    }

    /// Re-verify link and session, reconnecting what was lost
    pub async fn periodic_health_check(&mut self, state: &mut ConnectivityState) -> HealthCheck {
        let link_was_up = state.link_up();
        let session_was_up = state.session_up();
        let mut reconnected = false;

        if !self.ensure_link(state).await {
            warn!("Link still down after health check");
        } else if state.session_up() {
            if let Err(err) = self.transport.ping().await {
                warn!("MQTT ping failed, attempting to reconnect: {}", err);
                self.lose_session(state, &err);
                reconnected = self.ensure_session(state).await == SessionOutcome::Connected;
            }
        } else {
            reconnected = self.ensure_session(state).await == SessionOutcome::Connected;
        }

        let check = HealthCheck {
            link_changed: link_was_up != state.link_up(),
            session_changed: session_was_up != state.session_up(),
            reconnected,
        };
        if check.link_changed || check.session_changed {
            info!(
                "Connectivity changed: link {} -> {}, session {} -> {}",
                link_was_up,
                state.link_up(),
                session_was_up,
                state.session_up()
            );
        }
        check
    }

    fn lose_session(&mut self, state: &mut ConnectivityState, err: &TransportError) {
        state.mark_session_down();
        self.stats.record_failure(err.to_string());
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;
    use crate::mqtt::transport::MockTransport;
    use assert_matches::assert_matches;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn manager(link: MockLink, transport: MockTransport) -> ConnectivityManager<MockLink, MockTransport> {
        let announcements = vec![Announcement {
            topic: "ha/sensor/node/lux/config".to_string(),
            payload: "{}".to_string(),
        }];
        ConnectivityManager::new(link, transport, RetryPolicy::default(), announcements)
    }

    fn up_link() -> MockLink {
        let mut link = MockLink::new();
        link.expect_is_up().returning(|| true);
        link
    }

    fn connected_state() -> ConnectivityState {
        let mut state = ConnectivityState::new();
        state.mark_link_up();
        state.mark_session_up();
        state
    }

    #[tokio::test]
    async fn test_ensure_link_noop_when_up() {
        let mut link = up_link();
        link.expect_connect().never();
        let mut mgr = manager(link, MockTransport::new());
        let mut state = ConnectivityState::new();

        assert!(mgr.ensure_link(&mut state).await);
        assert!(state.link_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_link_gives_up_after_bounded_attempts() {
        let mut link = MockLink::new();
        link.expect_is_up().times(11).returning(|| false);
        link.expect_connect().times(1).returning(|| Ok(()));
        let mut mgr = manager(link, MockTransport::new());
        let mut state = ConnectivityState::new();

        let start = Instant::now();
        assert!(!mgr.ensure_link(&mut state).await);
        assert!(!state.link_up());
        assert_eq!(start.elapsed(), std::time::Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_link_recovers_mid_retry() {
        let mut link = MockLink::new();
        let mut seq = Sequence::new();
        link.expect_is_up()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|| false);
        link.expect_is_up()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| true);
        link.expect_connect().returning(|| Ok(()));
        let mut mgr = manager(link, MockTransport::new());
        let mut state = ConnectivityState::new();

        assert!(mgr.ensure_link(&mut state).await);
        assert!(state.link_up());
    }

    #[tokio::test]
    async fn test_ensure_session_skips_transport_without_link() {
        let mut transport = MockTransport::new();
        transport.expect_connect().never();
        transport.expect_is_up().never();
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = ConnectivityState::new();

        assert_eq!(mgr.ensure_session(&mut state).await, SessionOutcome::LinkDown);
        assert!(!state.session_up());
    }

    #[tokio::test]
    async fn test_ensure_session_connects_and_announces() {
        let mut transport = MockTransport::new();
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport
            .expect_announce_schema()
            .times(1)
            .returning(|configs| Ok(configs.len()));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = ConnectivityState::new();
        state.mark_link_up();

        assert_eq!(mgr.ensure_session(&mut state).await, SessionOutcome::Connected);
        assert!(state.session_up());
        assert_eq!(mgr.stats().total_connections(), 1);
    }

    #[tokio::test]
    async fn test_ensure_session_already_up() {
        let mut transport = MockTransport::new();
        transport.expect_is_up().returning(|| true);
        transport.expect_connect().never();
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = connected_state();

        assert_eq!(mgr.ensure_session(&mut state).await, SessionOutcome::AlreadyUp);
    }

    #[tokio::test]
    async fn test_ensure_session_single_attempt_on_failure() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|| Err(TransportError::Timeout("connack")));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = ConnectivityState::new();
        state.mark_link_up();

        assert_eq!(mgr.ensure_session(&mut state).await, SessionOutcome::Failed);
        assert!(!state.session_up());
        assert_eq!(mgr.stats().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_keepalive_failure_marks_session_down() {
        let mut transport = MockTransport::new();
        transport
            .expect_keepalive()
            .returning(|| Err(TransportError::NotConnected));
        transport.expect_connect().never();
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = connected_state();

        assert!(!mgr.keepalive(&mut state).await);
        assert!(!state.session_up());
        assert!(state.link_up());
    }

    #[tokio::test]
    async fn test_publish_fails_closed_without_session() {
        let mut transport = MockTransport::new();
        transport.expect_publish().never();
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = ConnectivityState::new();
        state.mark_link_up();

        assert!(!mgr.publish(&mut state, "t", "1", false).await);
    }

    #[tokio::test]
    async fn test_rejected_publish_keeps_session() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .returning(|_, _, _| Err(TransportError::Rejected("too big".to_string())));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = connected_state();

        assert!(!mgr.publish(&mut state, "t", "1", false).await);
        assert!(state.session_up());
    }

    #[tokio::test]
    async fn test_batch_continues_past_failed_item() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .with(eq("a"), eq("1"), eq(true))
            .times(1)
            .returning(|_, _, _| Err(TransportError::Rejected("refused".to_string())));
        transport
            .expect_publish()
            .with(eq("b"), eq("2"), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));
        transport
            .expect_publish()
            .with(eq("c"), eq("3"), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = connected_state();

        let now = Instant::now();
        let items = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ];
        assert_eq!(mgr.publish_batch(&mut state, &items, true, now).await, 2);
        assert_eq!(state.last_publish(), Some(now));
    }

    #[tokio::test]
    async fn test_batch_without_success_keeps_old_timestamp() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(TransportError::Timeout("publish flush")));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = connected_state();

        let items = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];
        assert_eq!(mgr.publish_batch(&mut state, &items, true, Instant::now()).await, 0);
        assert_eq!(state.last_publish(), None);
        assert!(!state.session_up());
    }

    #[tokio::test]
    async fn test_health_check_reconnects_after_failed_ping() {
        let mut transport = MockTransport::new();
        transport
            .expect_ping()
            .times(1)
            .returning(|| Err(TransportError::Timeout("ping")));
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport
            .expect_announce_schema()
            .times(1)
            .returning(|configs| Ok(configs.len()));
        let mut mgr = manager(up_link(), transport);
        let mut state = connected_state();

        let check = mgr.periodic_health_check(&mut state).await;
        assert!(check.reconnected);
        assert!(!check.session_changed);
        assert!(check.needs_status_report());
        assert!(state.session_up());
    }

    #[tokio::test]
    async fn test_health_check_quiet_when_healthy() {
        let mut transport = MockTransport::new();
        transport.expect_ping().times(1).returning(|| Ok(()));
        transport.expect_connect().never();
        let mut mgr = manager(up_link(), transport);
        let mut state = connected_state();

        let check = mgr.periodic_health_check(&mut state).await;
        assert_eq!(check, HealthCheck::default());
        assert!(!check.needs_status_report());
    }

    #[tokio::test]
    async fn test_health_check_retries_session_when_down() {
        let mut transport = MockTransport::new();
        transport.expect_ping().never();
        transport
            .expect_connect()
            .times(1)
            .returning(|| Err(TransportError::Refused("NotAuthorized".to_string())));
        let mut mgr = manager(up_link(), transport);
        let mut state = ConnectivityState::new();

        let check = mgr.periodic_health_check(&mut state).await;
        assert!(check.link_changed);
        assert!(!check.session_changed);
        assert!(!check.reconnected);
        assert!(state.link_up());
        assert!(!state.session_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_detects_link_loss() {
        let mut link = MockLink::new();
        link.expect_is_up().returning(|| false);
        link.expect_connect().returning(|| Ok(()));
        let mut transport = MockTransport::new();
        transport.expect_ping().never();
        transport.expect_connect().never();
        let mut mgr = manager(link, transport);
        let mut state = connected_state();

        let check = mgr.periodic_health_check(&mut state).await;
        assert!(check.link_changed);
        assert!(check.session_changed);
        assert!(!state.link_up());
        assert!(!state.session_up());
    }

    #[tokio::test]
    async fn test_announce_failure_drops_session() {
        let mut transport = MockTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_announce_schema()
            .returning(|_| Err(TransportError::Timeout("publish flush")));
        let mut mgr = manager(MockLink::new(), transport);
        let mut state = ConnectivityState::new();
        state.mark_link_up();

        assert_matches!(mgr.ensure_session(&mut state).await, SessionOutcome::Failed);
        assert!(!state.session_up());
    }

    #[tokio::test]
    async fn test_broker_outage_is_a_session_fault_not_a_link_fault() {
        use crate::config::MqttConfig;
        use crate::link::HostLink;
        use crate::mqtt::{MqttTransport, TopicLayout};
        use crate::state::{DeviceStatus, FaultTracker, HealthEvaluator};

        let sysfs = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(sysfs.path().join("eth0")).unwrap();
        std::fs::write(sysfs.path().join("eth0/operstate"), "up\n").unwrap();

        // Nothing listens on this port once the listener is dropped
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            client_id: "node".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 120,
            io_timeout_ms: 200,
            discovery_prefix: "ha".to_string(),
            node_id: "node".to_string(),
        };
        let transport = MqttTransport::new(config, TopicLayout::new("ha", "node"));
        let mut mgr = ConnectivityManager::new(
            HostLink::with_root(sysfs.path()),
            transport,
            RetryPolicy::default(),
            Vec::new(),
        );
        let mut state = ConnectivityState::new();

        assert!(mgr.ensure_link(&mut state).await);
        assert_eq!(mgr.ensure_session(&mut state).await, SessionOutcome::Failed);

        let mut faults = FaultTracker::default();
        faults.register("climate");
        assert_eq!(
            HealthEvaluator::default().evaluate(&state, &faults, Instant::now()),
            DeviceStatus::SessionDown
        );
    }
}
