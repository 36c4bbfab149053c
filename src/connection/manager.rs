//! Connection manager facade: starts roles and routes sends to the current session

use super::candidate::CandidateFilter;
use super::current::CurrentSession;
use super::events;
use super::initiator::run_initiator;
use super::listener::run_listener;
use super::role::{RoleContext, RoleHandle};
use super::session::SessionHandle;
use crate::transport::{RadioControl, Transport};
use btchat_shared::{
    defaults, ConnectionError, ConnectionEvent, DiscoveredPeer, PeerAddress, Role,
    ServiceDescriptor,
};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Bluetooth transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BluetoothMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    Rfcomm,
    /// Use TCP simulation (for development)
    #[default]
    TcpSimulation,
}

/// Bluetooth configuration
#[derive(Debug, Clone)]
pub struct BluetoothConfig {
    /// Bluetooth transport mode
    pub mode: BluetoothMode,
    /// RFCOMM channel the listener advertises
    pub channel: u8,
    /// TCP simulation address (when mode is TcpSimulation)
    pub tcp_address: String,
    /// Only initiate towards discovered devices whose name contains this
    pub name_filter: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            mode: BluetoothMode::TcpSimulation,
            channel: defaults::RFCOMM_CHANNEL,
            tcp_address: defaults::TCP_SIMULATION_ADDRESS.into(),
            name_filter: None,
        }
    }
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service offered by the listener and targeted by the initiator
    pub service: ServiceDescriptor,
    /// Bluetooth configuration
    pub bluetooth: BluetoothConfig,
    /// Accept attempts before the listener gives up
    pub accept_attempts: u32,
    /// Size of each session's read buffer
    pub read_buffer_size: usize,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service: ServiceDescriptor::default(),
            bluetooth: BluetoothConfig::default(),
            accept_attempts: defaults::ACCEPT_ATTEMPTS,
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

/// Starts listener/initiator roles and holds the single current session.
///
/// The manager does not wait for roles it started; starting a new role only
/// repoints the current session once that role promotes a connection.
pub struct ConnectionManager<T: Transport> {
    config: ConnectionConfig,
    ctx: RoleContext<T>,
    candidates: Mutex<CandidateFilter>,
    /// Channel to receive connection events
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a new connection manager over `transport`
    pub fn new(config: ConnectionConfig, transport: T, radio: Arc<dyn RadioControl>) -> Self {
        let (events, event_rx) = events::channel(config.event_capacity);
        let ctx = RoleContext {
            transport: Arc::new(transport),
            radio,
            events,
            current: CurrentSession::new(),
            session_ids: Arc::new(AtomicU64::new(0)),
            read_buffer_size: config.read_buffer_size,
        };
        let candidates = Mutex::new(CandidateFilter::new(config.bluetooth.name_filter.clone()));

        Self {
            config,
            ctx,
            candidates,
            event_rx,
        }
    }

    /// Start listening for one peer on the configured service
    pub fn start_server(&self) -> RoleHandle {
        let ctx = self.ctx.clone();
        let service = self.config.service.clone();
        let attempts = self.config.accept_attempts;
        info!("Starting listener for {}", service);

        RoleHandle::spawn(Role::Listener, move |cancel| {
            run_listener(ctx, service, attempts, cancel)
        })
    }

    /// Start connecting to `peer` on the configured service
    pub fn start_client(&self, peer: PeerAddress) -> RoleHandle {
        let ctx = self.ctx.clone();
        let service = self.config.service.clone();
        info!("Starting initiator towards {}", peer);

        RoleHandle::spawn(Role::Initiator, move |cancel| {
            run_initiator(ctx, service, peer, cancel)
        })
    }

    /// React to a discovered device; starts an initiator if it is selected
    pub fn on_candidate(&self, candidate: &DiscoveredPeer) -> Option<RoleHandle> {
        if !self.candidates.lock().accept(candidate) {
            debug!("Ignoring candidate {} ({:?})", candidate.address, candidate.name);
            return None;
        }
        Some(self.start_client(candidate.address.clone()))
    }

    /// Forget candidates seen during the last scan
    pub fn discovery_finished(&self) {
        self.candidates.lock().reset();
    }

    /// Send on the current session
    pub async fn send_on_current(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let session = self
            .ctx
            .current
            .get()
            .ok_or(ConnectionError::NoActiveSession)?;
        session.send(bytes).await
    }

    /// The session sends are routed to, if any
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.ctx.current.get()
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.config.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{pair, ScriptedTransport, Step};
    use crate::transport::SimulatedRadio;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn manager(
        transport: ScriptedTransport,
    ) -> (ConnectionManager<ScriptedTransport>, Arc<SimulatedRadio>) {
        let radio = Arc::new(SimulatedRadio::new());
        let manager = ConnectionManager::new(ConnectionConfig::default(), transport, radio.clone());
        (manager, radio)
    }

    async fn next_event(manager: &mut ConnectionManager<ScriptedTransport>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(2), manager.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn assert_quiet(manager: &mut ConnectionManager<ScriptedTransport>) {
        let extra = tokio::time::timeout(Duration::from_millis(100), manager.recv()).await;
        assert!(extra.is_err(), "unexpected event: {:?}", extra);
    }

    fn connected(role: Role, peer: &str) -> ConnectionEvent {
        ConnectionEvent::Connected {
            role,
            peer: PeerAddress::from(peer),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.accept_attempts, 2);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.bluetooth.mode, BluetoothMode::TcpSimulation);
        assert_eq!(config.bluetooth.channel, 1);
        assert_eq!(config.service, ServiceDescriptor::default());
    }

    #[tokio::test]
    async fn test_listener_session_lifecycle() {
        let (stream, mut remote) = pair("peer-a");
        // Data already in flight before the accept completes
        remote.write_all(&[0x41, 0x42]).await.unwrap();

        let (mut manager, radio) = manager(ScriptedTransport::new().on_accept(Step::Peer(stream)));
        let role = manager.start_server();
        assert_eq!(role.role(), Role::Listener);

        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );
        assert_eq!(next_event(&mut manager).await, connected(Role::Listener, "peer-a"));
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::DataReceived {
                bytes: Bytes::from_static(&[0x41, 0x42]),
                length: 2,
            }
        );

        let session = role.join().await.expect("no session promoted");
        assert_eq!(radio.cancellations(), 1);
        assert_eq!(manager.current_session().map(|s| s.id()), Some(session.id()));

        manager.send_on_current(&[0x4F, 0x4B]).await.expect("send failed");
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::DataSent { length: 2 }
        );
        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x4F, 0x4B]);

        drop(remote);
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Listener,
                cause: ConnectionError::PeerClosed,
            }
        );
        assert_eq!(
            manager.send_on_current(b"late").await,
            Err(ConnectionError::NoActiveSession)
        );
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let (manager, _radio) = manager(ScriptedTransport::new());
        assert!(manager.current_session().is_none());
        assert_eq!(
            manager.send_on_current(b"hello").await,
            Err(ConnectionError::NoActiveSession)
        );
    }

    #[tokio::test]
    async fn test_initiator_connect_failure() {
        let (mut manager, radio) =
            manager(ScriptedTransport::new().on_connect(Step::Fail("no listener")));

        let role = manager.start_client(PeerAddress::from("00:11:22:33:44:55"));
        match next_event(&mut manager).await {
            ConnectionEvent::ConnectionFailed {
                role: Role::Initiator,
                cause: ConnectionError::ConnectFailure(reason),
            } => assert!(reason.contains("no listener")),
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(role.join().await.is_none());
        assert!(manager.current_session().is_none());
        assert_eq!(radio.cancellations(), 0);
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_current_session() {
        let (stream, _remote) = pair("peer-a");
        let transport = ScriptedTransport::new()
            .on_connect(Step::Peer(stream))
            .on_connect(Step::Fail("no listener"));
        let (mut manager, _radio) = manager(transport);

        let first = manager
            .start_client(PeerAddress::from("peer-a"))
            .join()
            .await
            .expect("no session promoted");
        assert_eq!(next_event(&mut manager).await, connected(Role::Initiator, "peer-a"));

        let role = manager.start_client(PeerAddress::from("peer-b"));
        assert!(matches!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Initiator,
                cause: ConnectionError::ConnectFailure(_),
            }
        ));
        assert!(role.join().await.is_none());

        assert_eq!(manager.current_session().map(|s| s.id()), Some(first.id()));
        assert!(!first.is_closed());
    }

    #[tokio::test]
    async fn test_send_and_cancel_with_full_event_channel() {
        let (stream, mut remote) = pair("peer-a");
        let transport = ScriptedTransport::new().on_accept(Step::Peer(stream));
        let config = ConnectionConfig {
            event_capacity: 2,
            ..Default::default()
        };
        let mut manager =
            ConnectionManager::new(config, transport, Arc::new(SimulatedRadio::new()));

        let role = manager.start_server();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );
        assert_eq!(next_event(&mut manager).await, connected(Role::Listener, "peer-a"));
        let session = role.join().await.expect("no session promoted");

        // Fill the channel while nobody drains it
        for chunk in [b"A", b"B", b"C"] {
            remote.write_all(chunk).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), manager.send_on_current(b"x"))
            .await
            .expect("send waited on the event channel")
            .expect("send failed");
        let mut buf = [0u8; 1];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");

        session.cancel();
        tokio::time::timeout(Duration::from_secs(2), session.closed())
            .await
            .expect("session did not close");
        assert!(manager.current_session().is_none());

        for chunk in [b"A", b"B"] {
            assert_eq!(
                next_event(&mut manager).await,
                ConnectionEvent::DataReceived {
                    bytes: Bytes::copy_from_slice(chunk),
                    length: 1,
                }
            );
        }
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Listener,
                cause: ConnectionError::Cancelled,
            }
        );
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_send_routable_once_connected_is_seen() {
        let (stream, mut remote) = pair("peer-a");
        let (mut manager, _radio) = manager(ScriptedTransport::new().on_connect(Step::Peer(stream)));

        let _role = manager.start_client(PeerAddress::from("peer-a"));
        assert_eq!(next_event(&mut manager).await, connected(Role::Initiator, "peer-a"));
        manager.send_on_current(b"hi").await.expect("no session to send on");

        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_initiator_promotes_without_connecting_event() {
        let (stream, _remote) = pair("00:11:22:33:44:55");
        let (mut manager, radio) = manager(ScriptedTransport::new().on_connect(Step::Peer(stream)));

        let role = manager.start_client(PeerAddress::from("00:11:22:33:44:55"));
        assert_eq!(
            next_event(&mut manager).await,
            connected(Role::Initiator, "00:11:22:33:44:55")
        );

        let session = role.join().await.expect("no session promoted");
        assert_eq!(session.role(), Role::Initiator);
        assert_eq!(radio.cancellations(), 1);
        assert!(manager.current_session().is_some());
    }

    #[tokio::test]
    async fn test_accept_retried_once_then_gives_up() {
        let transport = ScriptedTransport::new()
            .on_accept(Step::Fail("first"))
            .on_accept(Step::Fail("second"));
        let (mut manager, _radio) = manager(transport);

        let role = manager.start_server();
        for reason in ["first", "second"] {
            assert_eq!(
                next_event(&mut manager).await,
                ConnectionEvent::Connecting { role: Role::Listener }
            );
            assert_eq!(
                next_event(&mut manager).await,
                ConnectionEvent::ConnectionFailed {
                    role: Role::Listener,
                    cause: ConnectionError::AcceptFailure(reason.into()),
                }
            );
        }

        assert!(role.join().await.is_none());
        assert!(manager.current_session().is_none());
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_accept_retry_can_succeed() {
        let (stream, _remote) = pair("peer-a");
        let transport = ScriptedTransport::new()
            .on_accept(Step::Fail("transient"))
            .on_accept(Step::Peer(stream));
        let (mut manager, _radio) = manager(transport);

        let role = manager.start_server();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );
        assert!(matches!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                cause: ConnectionError::AcceptFailure(_),
                ..
            }
        ));
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );
        assert_eq!(next_event(&mut manager).await, connected(Role::Listener, "peer-a"));
        assert!(role.join().await.is_some());
    }

    #[tokio::test]
    async fn test_bind_failure_fails_fast() {
        let (mut manager, _radio) =
            manager(ScriptedTransport::new().fail_bind("address in use"));

        let role = manager.start_server();
        match next_event(&mut manager).await {
            ConnectionEvent::ConnectionFailed {
                role: Role::Listener,
                cause: ConnectionError::BindFailure(reason),
            } => assert!(reason.contains("address in use")),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(role.join().await.is_none());
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_radio_disabled() {
        let (mut manager, radio) = manager(ScriptedTransport::new());
        radio.set_enabled(false);

        assert!(manager.start_server().join().await.is_none());
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Listener,
                cause: ConnectionError::RadioDisabled,
            }
        );

        assert!(manager
            .start_client(PeerAddress::from("peer-a"))
            .join()
            .await
            .is_none());
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Initiator,
                cause: ConnectionError::RadioDisabled,
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_blocked_accept_is_silent() {
        let (mut manager, _radio) = manager(ScriptedTransport::new());

        let role = manager.start_server();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );

        role.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(2), role.join())
            .await
            .expect("listener did not stop");
        assert!(joined.is_none());
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_cancel_blocked_connect_is_silent() {
        let (mut manager, _radio) = manager(ScriptedTransport::new());

        let role = manager.start_client(PeerAddress::from("peer-a"));
        role.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(2), role.join())
            .await
            .expect("initiator did not stop");
        assert!(joined.is_none());
        assert_quiet(&mut manager).await;
    }

    #[tokio::test]
    async fn test_new_role_replaces_current_without_closing() {
        let (first, mut remote_first) = pair("peer-a");
        let (second, mut remote_second) = pair("peer-b");
        let transport = ScriptedTransport::new()
            .on_accept(Step::Peer(first))
            .on_connect(Step::Peer(second));
        let (mut manager, _radio) = manager(transport);

        let first = manager.start_server().join().await.expect("no first session");
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::Connecting { role: Role::Listener }
        );
        assert_eq!(next_event(&mut manager).await, connected(Role::Listener, "peer-a"));

        let second = manager
            .start_client(PeerAddress::from("peer-b"))
            .join()
            .await
            .expect("no second session");
        assert_eq!(next_event(&mut manager).await, connected(Role::Initiator, "peer-b"));

        assert_eq!(manager.current_session().map(|s| s.id()), Some(second.id()));
        assert!(!first.is_closed());

        // The replaced session keeps reading
        remote_first.write_all(b"still here").await.unwrap();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::DataReceived {
                bytes: Bytes::from_static(b"still here"),
                length: 10,
            }
        );

        // Sends go to the new session
        manager.send_on_current(b"to b").await.unwrap();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::DataSent { length: 4 }
        );
        let mut buf = [0u8; 4];
        remote_second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"to b");

        // The old session ending leaves the new one current
        first.cancel();
        assert_eq!(
            next_event(&mut manager).await,
            ConnectionEvent::ConnectionFailed {
                role: Role::Listener,
                cause: ConnectionError::Cancelled,
            }
        );
        assert_eq!(manager.current_session().map(|s| s.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn test_candidate_starts_initiator_on_match() {
        let (stream, _remote) = pair("00:00:00:00:00:02");
        let transport = ScriptedTransport::new().on_connect(Step::Peer(stream));
        let radio = Arc::new(SimulatedRadio::new());
        let config = ConnectionConfig {
            bluetooth: BluetoothConfig {
                name_filter: Some("Lenovo".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut manager = ConnectionManager::new(config, transport, radio);

        let other = DiscoveredPeer {
            address: PeerAddress::from("00:00:00:00:00:01"),
            name: Some("Pixel".into()),
        };
        let target = DiscoveredPeer {
            address: PeerAddress::from("00:00:00:00:00:02"),
            name: Some("Lenovo Tab".into()),
        };

        assert!(manager.on_candidate(&other).is_none());
        let role = manager.on_candidate(&target).expect("candidate not selected");
        assert_eq!(role.role(), Role::Initiator);
        assert!(manager.on_candidate(&target).is_none());

        assert_eq!(
            next_event(&mut manager).await,
            connected(Role::Initiator, "00:00:00:00:00:02")
        );
        assert!(role.join().await.is_some());
    }
}
