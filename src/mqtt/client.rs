use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS,
};
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;
use crate::error::TransportError;
use crate::mqtt::discovery::TopicLayout;
use crate::mqtt::transport::Transport;

/// Payload the broker publishes on the status topic if we vanish
pub const LAST_WILL_PAYLOAD: &str = "Offline";

/// Largest payload we hand to the client (matches rumqttc's default packet limit)
const MAX_PAYLOAD_LEN: usize = 10 * 1024;

/// How long a keepalive call services the event loop
const KEEPALIVE_WINDOW: Duration = Duration::from_millis(20);

/// Payload of the QoS 1 round trip used as the session liveness check
const PING_PAYLOAD: &str = "ping";

/// Upper bound on events handled per drive, so a chatty broker cannot
/// hold the tick
const MAX_EVENTS_PER_DRIVE: usize = 64;

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// `Transport` backed by a rumqttc client and its event loop.
///
/// The event loop is only ever polled from inside these calls, so all
/// network work happens on the scheduler's task within bounded waits.
pub struct MqttTransport {
    config: MqttConfig,
    layout: TopicLayout,
    session: Option<Session>,
    connected: bool,
}

impl MqttTransport {
    pub fn new(config: MqttConfig, layout: TopicLayout) -> Self {
        Self {
            config,
            layout,
            session: None,
            connected: false,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);

        if let Some(username) = &self.config.username {
            options.set_credentials(
                username.as_str(),
                self.config.password.as_deref().unwrap_or(""),
            );
        }
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);
        options.set_last_will(LastWill::new(
            self.layout.status_topic(),
            LAST_WILL_PAYLOAD,
            QoS::AtLeastOnce,
            true,
        ));
        options
    }

    /// Poll until the broker acknowledges the connection
    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(connack)) => {
                    return match connack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(TransportError::Refused(format!("{:?}", code))),
                    };
                }
                other => trace!("MQTT event before connack: {:?}", other),
            }
        }
    }

    /// Service the event loop until `window` passes with nothing to do
    async fn drive(session: &mut Session, window: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + window;
        for _ in 0..MAX_EVENTS_PER_DRIVE {
            match timeout_at(deadline, session.eventloop.poll()).await {
                Err(_) => return Ok(()),
                Ok(Ok(Event::Incoming(Packet::PingResp))) => debug!("Ping response received"),
                Ok(Ok(event)) => trace!("MQTT event: {:?}", event),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Poll until the queued publish has been written to the socket
    async fn flush(session: &mut Session, limit: Duration) -> Result<(), TransportError> {
        let wait = async {
            loop {
                match session.eventloop.poll().await? {
                    Event::Outgoing(Outgoing::Publish(_)) => return Ok::<(), TransportError>(()),
                    event => trace!("MQTT event while flushing: {:?}", event),
                }
            }
        };
        timeout(limit, wait)
            .await
            .map_err(|_| TransportError::Timeout("publish flush"))?
    }

    /// Publish at QoS 1 and wait for the broker's PUBACK
    async fn round_trip(
        session: &mut Session,
        topic: &str,
        limit: Duration,
    ) -> Result<(), TransportError> {
        session
            .client
            .publish(topic, QoS::AtLeastOnce, false, PING_PAYLOAD.as_bytes().to_vec())
            .await?;
        let wait = async {
            loop {
                match session.eventloop.poll().await? {
                    Event::Incoming(Packet::PubAck(ack)) => {
                        debug!("Ping acknowledged (pkid {})", ack.pkid);
                        return Ok::<(), TransportError>(());
                    }
                    event => trace!("MQTT event while awaiting ping ack: {:?}", event),
                }
            }
        };
        timeout(limit, wait)
            .await
            .map_err(|_| TransportError::Timeout("ping acknowledgement"))?
    }

    fn validate(topic: &str, payload: &str) -> Result<(), TransportError> {
        if topic.is_empty() || topic.contains(&['+', '#'][..]) {
            return Err(TransportError::Rejected(format!("invalid topic {:?}", topic)));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::Rejected(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut Session, TransportError> {
        match self.session.as_mut() {
            Some(session) if self.connected => Ok(session),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn mark_lost<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(err) = &result {
            if err.is_connection_loss() {
                self.connected = false;
            }
        }
        result
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(old) = self.session.take() {
            // Best effort, the old event loop is dropped either way
            let _ = old.client.try_disconnect();
        }
        self.connected = false;

        info!(
            "Attempting MQTT connection to {}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );
        let (client, mut eventloop) = AsyncClient::new(self.options(), 32);

        timeout(self.config.io_timeout(), Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout("connack"))??;

        self.session = Some(Session { client, eventloop });
        self.connected = true;
        info!("Connected to MQTT broker");

        // A publish round trip proves the session actually carries data
        let test_topic = self.layout.test_topic();
        self.publish(&test_topic, "connected", false).await?;
        debug!("MQTT connection test successful");
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.connected && self.session.is_some()
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<(), TransportError> {
        Self::validate(topic, payload)?;
        let limit = self.config.io_timeout();
        let session = self.session_mut()?;

        let result = async {
            session
                .client
                .publish(topic, QoS::AtMostOnce, retain, payload.as_bytes().to_vec())
                .await?;
            Self::flush(session, limit).await
        }
        .await;

        if let Err(err) = &result {
            warn!("Publish to {} failed: {}", topic, err);
        }
        self.mark_lost(result)
    }

    async fn keepalive(&mut self) -> Result<(), TransportError> {
        let session = self.session_mut()?;
        let result = Self::drive(session, KEEPALIVE_WINDOW).await;
        self.mark_lost(result)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        // rumqttc gives no on-demand PINGREQ, so a QoS 1 publish stands in
        // for one: the broker must answer within the io timeout
        let limit = self.config.io_timeout();
        let topic = self.layout.test_topic();
        let session = self.session_mut()?;
        let result = Self::round_trip(session, &topic, limit).await;
        if let Err(err) = &result {
            warn!("MQTT ping failed: {}", err);
        }
        self.mark_lost(result)
    }
}
