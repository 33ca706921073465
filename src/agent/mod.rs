//! # Device Agent Control Loop
//!
//! The single orchestrating state machine. One instance owns the transport
//! link, the broker session and both pins; one cooperative control flow runs
//! the tick loop for the process lifetime. There are no background tasks and
//! no shared state, so edge handling, publishes and inbound delivery are
//! strictly serialized by the tick order.
//!
//! ```text
//! Button ──► DeviceAgent ──► Session ──► Link   (outbound)
//! Link ──► Session ──► DeviceAgent ──► LED      (inbound)
//! ```
//!
//! Per tick:
//! 1. Session inactive → recovery loop (unbounded, backoff between attempts)
//! 2. Edge event → drive LED, publish on rising (one bounded inline retry)
//! 3. Session poll → apply inbound commands to the LED

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{TimingConfig, TopicConfig};
use crate::gpio::{EdgeEvent, InputMonitor, OutputActuator};
use crate::link::Link;
use crate::session::{InboundMessage, Session};

/// Announced once after the initial session establishment.
pub const ANNOUNCE_CONNECTED: &[u8] = b"connected";
/// Announced after every successful session recovery.
pub const ANNOUNCE_RECONNECTED: &[u8] = b"reconnected";
/// Published on each rising edge of the button.
pub const BUTTON_PRESSED: &[u8] = b"Button pressed!";

pub struct DeviceAgent<L, S, I, O> {
    link: L,
    session: S,
    input: I,
    output: O,
    topics: TopicConfig,
    /// Broker username/password. Used by the initial connect only; the
    /// recovery paths connect with the client id alone.
    credentials: (String, String),
    timing: TimingConfig,
}

impl<L, S, I, O> DeviceAgent<L, S, I, O>
where
    L: Link,
    S: Session,
    I: InputMonitor,
    O: OutputActuator,
{
    pub fn new(
        link: L,
        session: S,
        input: I,
        output: O,
        topics: TopicConfig,
        credentials: (String, String),
        timing: TimingConfig,
    ) -> Self {
        Self {
            link,
            session,
            input,
            output,
            topics,
            credentials,
            timing,
        }
    }

    /// Runs forever. The device has no termination path besides power loss.
    pub async fn run(mut self) {
        self.establish_initial().await;
        loop {
            self.tick().await;
        }
    }

    /// One credentialed connect attempt at startup. A failure here is not
    /// fatal; the first tick falls into the recovery procedure.
    async fn establish_initial(&mut self) {
        if let Err(e) = self.link.connect().await {
            warn!("Link association failed: {}", e);
            return;
        }
        let (username, password) = (&self.credentials.0, &self.credentials.1);
        match self.session.connect(Some((username, password))).await {
            Ok(()) => {
                if let Err(e) = self
                    .session
                    .publish(&self.topics.outbound, ANNOUNCE_CONNECTED)
                    .await
                {
                    warn!("Could not announce session: {}", e);
                }
            }
            Err(e) => warn!("Initial session connect failed: {}", e),
        }
    }

    async fn tick(&mut self) {
        if !self.session.is_active() {
            self.recover_session().await;
        }

        match self.input.poll_edge() {
            Some(EdgeEvent::Rising) => {
                info!("Button pressed");
                self.output.set_active(true);
                self.publish_edge().await;
            }
            Some(EdgeEvent::Falling) => {
                debug!("Button released");
                self.output.set_active(false);
            }
            None => {}
        }

        match self.session.poll().await {
            Ok(messages) => {
                for message in messages {
                    self.apply_command(&message);
                }
            }
            Err(e) => warn!("Session poll failed: {}", e),
        }
    }

    /// Restores the session, waiting forever if it has to. Only a successful
    /// connect exits this loop; attempts are separated by the configured
    /// backoff.
    async fn recover_session(&mut self) {
        info!("Session inactive, starting recovery");
        loop {
            if !self.link.is_connected().await {
                warn!("Link down, re-associating");
                if let Err(e) = self.link.connect().await {
                    warn!("Link recovery failed: {}", e);
                    sleep(self.timing.reconnect_backoff()).await;
                    continue;
                }
            }
            match self.session.connect(None).await {
                Ok(()) => {
                    match self
                        .session
                        .publish(&self.topics.outbound, ANNOUNCE_RECONNECTED)
                        .await
                    {
                        Ok(()) => info!("Session recovered"),
                        Err(e) => warn!("Recovery announcement failed: {}", e),
                    }
                    return;
                }
                Err(e) => {
                    warn!("Session connect failed: {}", e);
                    sleep(self.timing.reconnect_backoff()).await;
                }
            }
        }
    }

    /// Publish for a rising edge. On failure: one inline reconnect, a short
    /// delay so the retry does not race the failed send, then exactly one
    /// retry. A second failure drops the event.
    async fn publish_edge(&mut self) {
        if let Err(e) = self
            .session
            .publish(&self.topics.outbound, BUTTON_PRESSED)
            .await
        {
            warn!("Publish failed: {}; reconnecting for one retry", e);
            if let Err(e) = self.session.connect(None).await {
                warn!("Inline reconnect failed: {}", e);
            }
            sleep(self.timing.publish_retry_delay()).await;
            match self
                .session
                .publish(&self.topics.outbound, BUTTON_PRESSED)
                .await
            {
                Ok(()) => info!("Publish retry delivered"),
                Err(e) => warn!("Publish retry failed, dropping event: {}", e),
            }
        }
    }

    /// First payload byte `'1'` drives the LED on; anything else, including
    /// an empty payload, drives it off. Remaining bytes are ignored.
    fn apply_command(&mut self, message: &InboundMessage) {
        info!(%message, "Inbound command");
        let active = message.payload.first() == Some(&b'1');
        self.output.set_active(active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use crate::session::SessionError;
    use std::collections::VecDeque;

    struct MockLink {
        connected: bool,
        connect_calls: usize,
    }

    impl MockLink {
        fn up() -> Self {
            Self {
                connected: true,
                connect_calls: 0,
            }
        }

        fn down() -> Self {
            Self {
                connected: false,
                connect_calls: 0,
            }
        }
    }

    impl Link for MockLink {
        async fn connect(&mut self) -> Result<(), LinkError> {
            self.connect_calls += 1;
            self.connected = true;
            Ok(())
        }

        async fn is_connected(&mut self) -> bool {
            self.connected
        }
    }

    #[derive(Default)]
    struct MockSession {
        active: bool,
        /// Scripted outcomes for connect calls; exhausted means success.
        connect_failures: VecDeque<bool>,
        /// `true` per connect call that carried username/password.
        connect_credentialed: Vec<bool>,
        /// Scripted outcomes for publish attempts; exhausted means success.
        publish_failures: VecDeque<bool>,
        publish_attempts: usize,
        published: Vec<(String, Vec<u8>)>,
        /// One batch of inbound messages per poll call.
        inbound: VecDeque<Vec<InboundMessage>>,
        ops: Vec<&'static str>,
    }

    impl MockSession {
        fn active() -> Self {
            Self {
                active: true,
                ..Self::default()
            }
        }

        fn inactive() -> Self {
            Self::default()
        }

        fn refused() -> SessionError {
            SessionError::HandshakeRefused("not authorized".into())
        }
    }

    impl Session for MockSession {
        async fn connect(
            &mut self,
            credentials: Option<(&str, &str)>,
        ) -> Result<(), SessionError> {
            self.ops.push("connect");
            self.connect_credentialed.push(credentials.is_some());
            if self.connect_failures.pop_front().unwrap_or(false) {
                self.active = false;
                Err(Self::refused())
            } else {
                self.active = true;
                Ok(())
            }
        }

        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
            self.ops.push("publish");
            self.publish_attempts += 1;
            if !self.active {
                return Err(SessionError::NotActive);
            }
            if self.publish_failures.pop_front().unwrap_or(false) {
                // A failed send means the link dropped under the session.
                self.active = false;
                return Err(SessionError::ConnectionLost(
                    rumqttc::ConnectionError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "link dropped",
                    )),
                ));
            }
            self.published.push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn poll(&mut self) -> Result<Vec<InboundMessage>, SessionError> {
            self.ops.push("poll");
            if !self.active {
                return Err(SessionError::NotActive);
            }
            Ok(self.inbound.pop_front().unwrap_or_default())
        }

        fn is_active(&self) -> bool {
            self.active
        }
    }

    #[derive(Default)]
    struct MockInput {
        edges: VecDeque<EdgeEvent>,
    }

    impl InputMonitor for MockInput {
        fn poll_edge(&mut self) -> Option<EdgeEvent> {
            self.edges.pop_front()
        }
    }

    #[derive(Default)]
    struct MockOutput {
        levels: Vec<bool>,
    }

    impl OutputActuator for MockOutput {
        fn set_active(&mut self, active: bool) {
            self.levels.push(active);
        }
    }

    fn zero_timing() -> TimingConfig {
        TimingConfig {
            link_poll_ms: 0,
            reconnect_backoff_ms: 0,
            publish_retry_delay_ms: 0,
            poll_window_ms: 0,
        }
    }

    fn agent(
        link: MockLink,
        session: MockSession,
        input: MockInput,
    ) -> DeviceAgent<MockLink, MockSession, MockInput, MockOutput> {
        DeviceAgent::new(
            link,
            session,
            input,
            MockOutput::default(),
            TopicConfig {
                inbound: "bench/led".into(),
                outbound: "bench/button".into(),
            },
            ("device".into(), "secret".into()),
            zero_timing(),
        )
    }

    fn message(payload: &[u8]) -> InboundMessage {
        InboundMessage::new("bench/led", payload)
    }

    #[tokio::test]
    async fn initial_establishment_announces_connected_once() {
        let mut a = agent(MockLink::up(), MockSession::inactive(), MockInput::default());

        a.establish_initial().await;

        assert_eq!(a.session.connect_credentialed, vec![true]);
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), ANNOUNCE_CONNECTED.to_vec())]
        );
    }

    #[tokio::test]
    async fn rising_edge_publishes_exactly_once_and_lights_led() {
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Rising);
        let mut a = agent(MockLink::up(), MockSession::active(), input);

        a.tick().await;

        assert_eq!(a.session.publish_attempts, 1);
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), BUTTON_PRESSED.to_vec())]
        );
        assert_eq!(a.output.levels, vec![true]);
    }

    #[tokio::test]
    async fn falling_edge_darkens_led_without_publishing() {
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Falling);
        let mut a = agent(MockLink::up(), MockSession::active(), input);

        a.tick().await;

        assert_eq!(a.session.publish_attempts, 0);
        assert_eq!(a.output.levels, vec![false]);
    }

    #[tokio::test]
    async fn failed_publish_reconnects_and_retries_exactly_once() {
        let mut session = MockSession::active();
        session.publish_failures.push_back(true);
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Rising);
        let mut a = agent(MockLink::up(), session, input);

        a.tick().await;

        assert_eq!(a.session.publish_attempts, 2);
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), BUTTON_PRESSED.to_vec())]
        );
        // The inline reconnect must not use the startup credentials.
        assert_eq!(a.session.connect_credentialed, vec![false]);
    }

    #[tokio::test]
    async fn second_publish_failure_drops_the_event() {
        let mut session = MockSession::active();
        session.publish_failures.push_back(true);
        // Inline reconnect fails too, so the retry hits an inactive session.
        session.connect_failures.push_back(true);
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Rising);
        let mut a = agent(MockLink::up(), session, input);

        a.tick().await;

        assert_eq!(a.session.publish_attempts, 2);
        assert!(a.session.published.is_empty());
    }

    #[tokio::test]
    async fn recovery_retries_until_connect_succeeds() {
        let mut session = MockSession::inactive();
        session.connect_failures.push_back(true);
        session.connect_failures.push_back(true);
        let mut a = agent(MockLink::up(), session, MockInput::default());

        a.tick().await;

        assert_eq!(a.session.connect_credentialed, vec![false, false, false]);
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), ANNOUNCE_RECONNECTED.to_vec())]
        );
    }

    #[tokio::test]
    async fn recovery_runs_before_edge_and_inbound_processing() {
        let mut session = MockSession::inactive();
        session.connect_failures.push_back(true);
        session.inbound.push_back(vec![message(b"0")]);
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Rising);
        let mut a = agent(MockLink::up(), session, input);

        a.tick().await;

        // connect (failed), connect, announce, edge publish, poll
        assert_eq!(
            a.session.ops,
            vec!["connect", "connect", "publish", "publish", "poll"]
        );
        assert_eq!(a.session.published.len(), 2);
        assert_eq!(a.session.published[0].1, ANNOUNCE_RECONNECTED.to_vec());
        assert_eq!(a.session.published[1].1, BUTTON_PRESSED.to_vec());
    }

    #[tokio::test]
    async fn recovery_restores_a_dead_link_first() {
        let mut a = agent(MockLink::down(), MockSession::inactive(), MockInput::default());

        a.tick().await;

        assert_eq!(a.link.connect_calls, 1);
        assert!(a.session.is_active());
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), ANNOUNCE_RECONNECTED.to_vec())]
        );
    }

    #[tokio::test]
    async fn inbound_first_byte_selects_led_level() {
        let mut session = MockSession::active();
        session.inbound.push_back(vec![
            message(b"1"),
            message(b"0"),
            message(b""),
            message(b"1-with-trailing-bytes"),
            message(b"x1"),
        ]);
        let mut a = agent(MockLink::up(), session, MockInput::default());

        a.tick().await;

        assert_eq!(a.output.levels, vec![true, false, false, true, false]);
    }

    #[tokio::test]
    async fn empty_inbound_payload_is_inactive_not_a_fault() {
        let mut session = MockSession::active();
        session.inbound.push_back(vec![message(b"")]);
        let mut a = agent(MockLink::up(), session, MockInput::default());

        a.tick().await;

        assert_eq!(a.output.levels, vec![false]);
    }

    #[tokio::test]
    async fn edge_publish_completes_before_inbound_delivery() {
        let mut session = MockSession::active();
        session.inbound.push_back(vec![message(b"0")]);
        let mut input = MockInput::default();
        input.edges.push_back(EdgeEvent::Rising);
        let mut a = agent(MockLink::up(), session, input);

        a.tick().await;

        assert_eq!(a.session.ops, vec!["publish", "poll"]);
        // LED went on with the edge, then off with the inbound command.
        assert_eq!(a.output.levels, vec![true, false]);
    }

    #[tokio::test]
    async fn failed_initial_connect_is_left_to_tick_recovery() {
        let mut session = MockSession::inactive();
        session.connect_failures.push_back(true);
        let mut a = agent(MockLink::up(), session, MockInput::default());

        a.establish_initial().await;
        assert!(a.session.published.is_empty());

        a.tick().await;
        assert_eq!(a.session.connect_credentialed, vec![true, false]);
        assert_eq!(
            a.session.published,
            vec![("bench/button".to_string(), ANNOUNCE_RECONNECTED.to_vec())]
        );
    }
}
