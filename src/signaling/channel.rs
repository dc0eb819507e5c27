//! Reconnecting signaling channel
//!
//! A single actor task owns the physical link, the backoff state and the
//! scheduled reconnect deadline. [`SignalingChannel`] is a cheap handle that
//! talks to it over a command queue.

use parking_lot::RwLock;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use super::backoff::Backoff;
use super::protocol::{parse_inbound, role_announcement, InboundMessage, OutboundMessage, RemoteConfig};
use super::transport::{DuplexConnector, DuplexLink, LinkEvent};
use crate::config::SignalingConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;
use crate::webrtc::IceCandidate;

/// Channel connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ReconnectScheduled { attempt: u32, delay: Duration },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::ReconnectScheduled { .. } => "reconnect_scheduled",
        }
    }
}

/// Typed events out of the channel
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Opened,
    /// Follows every `Opened`; earlier negotiation state is stale
    Reconnected,
    Closed { code: Option<u16>, reason: String },
    Failed { error: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    AnswerReceived(String),
    RemoteCandidate(IceCandidate),
    ViewerReady,
    ConfigPushed(RemoteConfig),
    CapabilityRequest,
}

/// Where the session sends its outbound messages
pub trait MessageSink: Send + Sync {
    /// Fire and forget; dropped when there is no live link
    fn send(&self, message: OutboundMessage);
}

/// Channel settings
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub endpoint: String,
    pub role: String,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl ChannelSettings {
    pub fn from_config(config: &SignalingConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            role: config.role.clone(),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from_config(&SignalingConfig::default())
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    UpdateEndpoint { endpoint: String, reconnect: bool },
    ReconnectNow,
    Send(OutboundMessage),
    Close,
}

/// Handle to the channel actor
#[derive(Clone)]
pub struct SignalingChannel {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    endpoint: Arc<RwLock<String>>,
}

impl SignalingChannel {
    /// Start the actor. Nothing connects until [`Self::connect`].
    pub fn spawn<C: DuplexConnector>(
        settings: ChannelSettings,
        connector: C,
        events: Arc<EventBus>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let endpoint = Arc::new(RwLock::new(settings.endpoint.clone()));

        let actor = ChannelActor {
            backoff: Backoff::new(settings.base_delay, settings.max_delay),
            settings,
            connector: Box::new(connector),
            endpoint: endpoint.clone(),
            link: None,
            reconnect_at: None,
            terminal: false,
            state_tx,
            event_tx,
            bus: events,
            throttler: LogThrottler::default(),
        };
        tokio::spawn(actor.run(cmd_rx));

        (
            Self {
                commands: cmd_tx,
                state: state_rx,
                endpoint,
            },
            event_rx,
        )
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| AppError::Signaling("signaling actor stopped".to_string()))
    }

    /// Open a physical connection, cancelling any scheduled reconnect
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    pub fn update_endpoint(&self, endpoint: impl Into<String>, reconnect: bool) -> Result<()> {
        self.command(Command::UpdateEndpoint {
            endpoint: endpoint.into(),
            reconnect,
        })
    }

    /// Reset backoff, drop the live link and connect again immediately
    pub fn reconnect_now(&self) -> Result<()> {
        self.command(Command::ReconnectNow)
    }

    pub fn send_message(&self, message: OutboundMessage) -> Result<()> {
        self.command(Command::Send(message))
    }

    /// Terminal: no autonomous reconnection afterwards
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.read().clone()
    }
}

impl MessageSink for SignalingChannel {
    fn send(&self, message: OutboundMessage) {
        if let Err(e) = self.send_message(message) {
            debug!("Outbound message dropped: {}", e);
        }
    }
}

struct ChannelActor {
    settings: ChannelSettings,
    connector: Box<dyn DuplexConnector>,
    endpoint: Arc<RwLock<String>>,
    backoff: Backoff,
    link: Option<DuplexLink>,
    reconnect_at: Option<Instant>,
    terminal: bool,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: mpsc::UnboundedSender<SignalingEvent>,
    bus: Arc<EventBus>,
    throttler: LogThrottler,
}

async fn recv_link(link: &mut Option<DuplexLink>) -> LinkEvent {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or(LinkEvent::Closed {
            code: None,
            reason: "link dropped".to_string(),
        }),
        None => pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

impl ChannelActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("All signaling handles dropped, stopping actor");
                        self.shut_down();
                        break;
                    }
                },
                event = recv_link(&mut self.link) => self.handle_link_event(event),
                _ = sleep_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_connection().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.open_connection().await,
            Command::UpdateEndpoint { endpoint, reconnect } => {
                info!("Signaling endpoint updated: {}", endpoint);
                *self.endpoint.write() = endpoint;
                if reconnect {
                    self.backoff.reset();
                    self.open_connection().await;
                }
            }
            Command::ReconnectNow => {
                self.backoff.reset();
                self.open_connection().await;
            }
            Command::Send(message) => self.send(message),
            Command::Close => self.shut_down(),
        }
    }

    fn send(&mut self, message: OutboundMessage) {
        let Some(link) = self.link.as_ref() else {
            warn_throttled!(
                self.throttler,
                "send_disconnected",
                "Dropping '{}' message: not connected",
                message.kind()
            );
            return;
        };
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize '{}' message: {}", message.kind(), e);
                return;
            }
        };
        trace!("Sending '{}' message", message.kind());
        if link.outbound.send(text).is_err() {
            warn_throttled!(
                self.throttler,
                "send_link_gone",
                "Dropping '{}' message: link writer gone",
                message.kind()
            );
        }
    }

    async fn open_connection(&mut self) {
        // Never two physical connections
        self.link = None;
        self.reconnect_at = None;
        self.terminal = false;
        self.set_state(ConnectionState::Connecting);

        let endpoint = self.endpoint.read().clone();
        debug!("Connecting to {}", endpoint);
        let result = timeout(self.settings.connect_timeout, self.connector.connect(&endpoint)).await;

        let error = match result {
            Ok(Ok(link)) => {
                self.backoff.reset();
                self.throttler.clear("connect_failed");
                match role_announcement(&self.settings.role) {
                    Ok(text) => {
                        let _ = link.outbound.send(text);
                    }
                    Err(e) => warn!("Failed to encode role announcement: {}", e),
                }
                self.link = Some(link);
                info!("Signaling connected to {} as '{}'", endpoint, self.settings.role);
                self.set_state(ConnectionState::Open);
                self.emit(SignalingEvent::Opened);
                self.emit(SignalingEvent::Reconnected);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect to {} timed out", endpoint),
        };

        warn_throttled!(self.throttler, "connect_failed", "Signaling connect failed: {}", error);
        self.emit(SignalingEvent::Failed { error });
        self.schedule_reconnect();
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Text(text) => self.handle_text(&text),
            LinkEvent::Closed { code, reason } => {
                info!("Signaling link closed (code {:?}): {}", code, reason);
                self.link = None;
                self.emit(SignalingEvent::Closed { code, reason });
                self.schedule_reconnect();
            }
            LinkEvent::Failed(error) => {
                warn!("Signaling link failed: {}", error);
                self.link = None;
                self.emit(SignalingEvent::Failed { error });
                self.schedule_reconnect();
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let Some(message) = parse_inbound(text) else {
            return;
        };
        let event = match message {
            InboundMessage::BrowserReady => SignalingEvent::ViewerReady,
            InboundMessage::Answer { sdp } => SignalingEvent::AnswerReceived(sdp),
            InboundMessage::Ice(candidate) => SignalingEvent::RemoteCandidate(candidate),
            InboundMessage::Config(config) => SignalingEvent::ConfigPushed(config),
            InboundMessage::RequestCaps => SignalingEvent::CapabilityRequest,
            InboundMessage::Ping | InboundMessage::Pong => {
                trace!("Liveness message received");
                return;
            }
        };
        self.emit(event);
    }

    fn schedule_reconnect(&mut self) {
        if self.terminal {
            return;
        }
        let (attempt, delay) = self.backoff.next();
        info!("Reconnect attempt {} in {:?}", attempt, delay);
        self.set_state(ConnectionState::ReconnectScheduled { attempt, delay });
        self.bus.publish(SystemEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });
        self.emit(SignalingEvent::ReconnectScheduled { attempt, delay });
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn shut_down(&mut self) {
        self.terminal = true;
        self.reconnect_at = None;
        self.link = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            self.bus.publish(SystemEvent::SignalingStateChanged {
                state: state.name().to_string(),
                endpoint: self.endpoint.read().clone(),
            });
        }
    }

    fn emit(&self, event: SignalingEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Server side of one accepted mock connection
    struct ServerEnd {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<LinkEvent>,
    }

    #[derive(Default)]
    struct MockState {
        endpoints: Vec<String>,
        /// `false` entries make the next connects fail
        plan: VecDeque<bool>,
        servers: Vec<ServerEnd>,
    }

    #[derive(Clone, Default)]
    struct MockConnector(Arc<Mutex<MockState>>);

    impl MockConnector {
        fn failing_first(n: usize) -> Self {
            let mock = Self::default();
            mock.0.lock().plan.extend(std::iter::repeat(false).take(n));
            mock
        }

        fn connects(&self) -> usize {
            self.0.lock().endpoints.len()
        }

        fn server(&self, idx: usize) -> ServerEnd {
            let mut state = self.0.lock();
            let end = &mut state.servers[idx];
            let (tx, rx) = mpsc::unbounded_channel();
            // Swap out the receiver so the test can drain it
            let from_client = std::mem::replace(&mut end.from_client, rx);
            drop(tx);
            ServerEnd {
                from_client,
                to_client: end.to_client.clone(),
            }
        }
    }

    #[async_trait]
    impl DuplexConnector for MockConnector {
        async fn connect(&self, endpoint: &str) -> Result<DuplexLink> {
            let mut state = self.0.lock();
            state.endpoints.push(endpoint.to_string());
            if !state.plan.pop_front().unwrap_or(true) {
                return Err(AppError::Signaling("connection refused".into()));
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            state.servers.push(ServerEnd {
                from_client: out_rx,
                to_client: in_tx,
            });
            Ok(DuplexLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    fn spawn(connector: MockConnector) -> (SignalingChannel, mpsc::UnboundedReceiver<SignalingEvent>) {
        SignalingChannel::spawn(ChannelSettings::default(), connector, Arc::new(EventBus::new()))
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
        events.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_announces_role_first() {
        let mock = MockConnector::default();
        let (channel, mut events) = spawn(mock.clone());

        channel.connect().unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        assert_eq!(next(&mut events).await, SignalingEvent::Reconnected);
        assert_eq!(channel.state(), ConnectionState::Open);

        channel.send_message(OutboundMessage::Ping).unwrap();
        channel.close().unwrap();
        let mut server = mock.server(0);
        assert_eq!(server.from_client.recv().await.unwrap(), r#"{"role":"android"}"#);
        assert_eq!(server.from_client.recv().await.unwrap(), r#"{"type":"ping"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_schedules_reconnect_before_connecting() {
        let mock = MockConnector::default();
        let (channel, mut events) = spawn(mock.clone());

        channel.connect().unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        assert_eq!(next(&mut events).await, SignalingEvent::Reconnected);

        mock.server(0)
            .to_client
            .send(LinkEvent::Closed {
                code: Some(1006),
                reason: "gone".into(),
            })
            .unwrap();

        assert!(matches!(next(&mut events).await, SignalingEvent::Closed { code: Some(1006), .. }));
        assert_eq!(
            next(&mut events).await,
            SignalingEvent::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_millis(1500)
            }
        );
        assert_eq!(mock.connects(), 1);

        let scheduled_at = Instant::now();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        assert!(Instant::now() - scheduled_at >= Duration::from_millis(1500));
        assert_eq!(mock.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_reset_on_open() {
        let mock = MockConnector::failing_first(3);
        let (channel, mut events) = spawn(mock.clone());

        channel.connect().unwrap();
        let mut delays = Vec::new();
        loop {
            match next(&mut events).await {
                SignalingEvent::ReconnectScheduled { attempt, delay } => delays.push((attempt, delay.as_millis())),
                SignalingEvent::Opened => break,
                _ => {}
            }
        }
        assert_eq!(delays, vec![(1, 1500), (2, 3000), (3, 6000)]);
        assert_eq!(mock.connects(), 4);

        mock.server(0).to_client.send(LinkEvent::Failed("reset".into())).unwrap();
        loop {
            if let SignalingEvent::ReconnectScheduled { attempt, delay } = next(&mut events).await {
                assert_eq!((attempt, delay), (1, Duration::from_millis(1500)));
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_link_is_dropped() {
        let mock = MockConnector::default();
        let (channel, mut events) = spawn(mock.clone());

        channel.send_message(OutboundMessage::Ping).unwrap();
        channel.connect().unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        channel.close().unwrap();

        let mut server = mock.server(0);
        assert_eq!(server.from_client.recv().await.unwrap(), r#"{"role":"android"}"#);
        // Link dropped by close; nothing was queued
        assert_eq!(server.from_client.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_terminal() {
        let mock = MockConnector::failing_first(1);
        let (channel, mut events) = spawn(mock.clone());

        channel.connect().unwrap();
        assert!(matches!(next(&mut events).await, SignalingEvent::Failed { .. }));
        assert!(matches!(next(&mut events).await, SignalingEvent::ReconnectScheduled { .. }));

        channel.close().unwrap();
        let mut state = channel.state_watch();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.connects(), 1);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_cancels_scheduled() {
        let mock = MockConnector::failing_first(2);
        let (channel, mut events) = spawn(mock.clone());

        channel.connect().unwrap();
        assert!(matches!(next(&mut events).await, SignalingEvent::Failed { .. }));
        assert!(matches!(next(&mut events).await, SignalingEvent::ReconnectScheduled { attempt: 1, .. }));

        channel.reconnect_now().unwrap();
        assert!(matches!(next(&mut events).await, SignalingEvent::Failed { .. }));
        // Backoff was reset, so this is attempt 1 again
        assert!(matches!(next(&mut events).await, SignalingEvent::ReconnectScheduled { attempt: 1, .. }));
        assert_eq!(mock.connects(), 2);

        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_messages_become_events() {
        let mock = MockConnector::default();
        let (channel, mut events) = spawn(mock.clone());
        channel.connect().unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);
        assert_eq!(next(&mut events).await, SignalingEvent::Reconnected);

        let server = mock.server(0);
        for text in [
            "{not json",
            r#"{"type":"mystery"}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"answer","sdp":"v=0"}"#,
            r#"{"type":"browser-ready"}"#,
            r#"{"type":"request-caps"}"#,
        ] {
            server.to_client.send(LinkEvent::Text(text.into())).unwrap();
        }

        assert_eq!(next(&mut events).await, SignalingEvent::AnswerReceived("v=0".into()));
        assert_eq!(next(&mut events).await, SignalingEvent::ViewerReady);
        assert_eq!(next(&mut events).await, SignalingEvent::CapabilityRequest);
        assert_eq!(channel.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_endpoint_reconnects() {
        let mock = MockConnector::default();
        let (channel, mut events) = spawn(mock.clone());
        channel.connect().unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);

        channel.update_endpoint("ws://10.0.0.7:8080/ws", false).unwrap();
        channel.update_endpoint("ws://10.0.0.8:8080/ws", true).unwrap();
        assert_eq!(next(&mut events).await, SignalingEvent::Reconnected);
        assert_eq!(next(&mut events).await, SignalingEvent::Opened);

        assert_eq!(channel.endpoint(), "ws://10.0.0.8:8080/ws");
        let endpoints = mock.0.lock().endpoints.clone();
        assert_eq!(endpoints, vec!["ws://127.0.0.1:8080/ws", "ws://10.0.0.8:8080/ws"]);
    }
}
