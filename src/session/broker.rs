use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, TopicConfig};

use super::{InboundMessage, Session, SessionError, SessionState};

const KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_QUEUE_CAP: usize = 16;

/// MQTT session over rumqttc. Builds a fresh client and event loop per
/// connect attempt so every establishment starts from clean protocol state.
pub struct MqttSession {
    broker: BrokerConfig,
    topics: TopicConfig,
    poll_window: Duration,
    state: SessionState,
    conn: Option<(AsyncClient, EventLoop)>,
    pending: VecDeque<InboundMessage>,
}

impl MqttSession {
    pub fn new(broker: BrokerConfig, topics: TopicConfig, poll_window: Duration) -> Self {
        Self {
            broker,
            topics,
            poll_window,
            state: SessionState::default(),
            conn: None,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn drop_session(&mut self) {
        warn!("Broker session lost");
        self.conn = None;
        self.pending.clear();
        self.state = SessionState::Disconnected;
    }
}

impl Session for MqttSession {
    async fn connect(&mut self, credentials: Option<(&str, &str)>) -> Result<(), SessionError> {
        self.state = SessionState::Connecting;
        self.conn = None;
        self.pending.clear();

        let mut options = MqttOptions::new(
            self.broker.client_id.as_str(),
            self.broker.host.as_str(),
            self.broker.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((username, password)) = credentials {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAP);

        // Drive the handshake to its ConnAck.
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    self.state = SessionState::Disconnected;
                    return Err(SessionError::HandshakeRefused(format!("{:?}", ack.code)));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.state = SessionState::Disconnected;
                    return Err(e.into());
                }
            }
        }

        // Subscription is part of establishment on every connect path.
        if let Err(e) = client
            .subscribe(self.topics.inbound.as_str(), QoS::AtMostOnce)
            .await
        {
            self.state = SessionState::Disconnected;
            return Err(e.into());
        }
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(_))) => break,
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.pending
                        .push_back(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.state = SessionState::Disconnected;
                    return Err(e.into());
                }
            }
        }

        info!(
            broker = %self.broker.host,
            inbound = %self.topics.inbound,
            "Broker session active"
        );
        self.conn = Some((client, event_loop));
        self.state = SessionState::Active;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let Some((client, event_loop)) = self.conn.as_mut() else {
            return Err(SessionError::NotActive);
        };

        if let Err(e) = client.publish(topic, QoS::AtMostOnce, false, payload).await {
            self.drop_session();
            return Err(e.into());
        }

        // Run the event loop until the packet is written out. Inbound
        // publishes crossing us here are held for the next poll.
        let error = loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    debug!(topic, "Publish written");
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.pending
                        .push_back(InboundMessage::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        self.drop_session();
        Err(error.into())
    }

    async fn poll(&mut self) -> Result<Vec<InboundMessage>, SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let mut delivered: Vec<InboundMessage> = self.pending.drain(..).collect();
        let Some((_, event_loop)) = self.conn.as_mut() else {
            return Err(SessionError::NotActive);
        };

        // One bounded window per tick; keepalive traffic rides along.
        let mut failure = None;
        let _ = timeout(self.poll_window, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        delivered.push(InboundMessage::new(
                            publish.topic,
                            publish.payload.to_vec(),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        })
        .await;

        if let Some(e) = failure {
            self.drop_session();
            return Err(e.into());
        }
        Ok(delivered)
    }

    fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}
