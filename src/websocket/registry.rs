//! # Connection Registry & Heartbeat
//!
//! Process-wide set of open `/audio-stream` connections. The registry is an
//! actor, so registering, unregistering and sweeping never race each other:
//! every change goes through its mailbox.
//!
//! ## Heartbeat:
//! Every `heartbeat_interval` the registry sweeps all connections:
//! 1. A connection whose liveness flag is still cleared never answered the
//!    previous ping. It is told to terminate and dropped from the registry.
//! 2. Every other connection has its flag cleared and is told to ping.
//!
//! A pong sets the flag again (see [`Liveness::mark_alive`]), so a healthy
//! peer survives indefinitely while a silent one is gone within two intervals.

use actix::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ConnectionId;

/// Liveness flag shared between a socket actor and the registry.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    /// New connections start alive.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[cfg(test)]
    fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether the peer answered since the last call, and clears the
    /// flag for the next round.
    pub fn check_and_clear(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Instructions the registry sends to a connection.
#[derive(Message, Debug, Clone, Copy, PartialEq, Eq)]
#[rtype(result = "()")]
pub enum ConnectionCommand {
    /// Send a WebSocket ping.
    Ping,
    /// Drop the connection without a close handshake (missed heartbeat).
    Terminate,
    /// Close with `1001 Going Away` (server shutdown).
    Close,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub id: ConnectionId,
    pub remote_addr: String,
    pub liveness: Liveness,
    pub recipient: Recipient<ConnectionCommand>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unregister {
    pub id: ConnectionId,
}

/// Run one heartbeat sweep immediately, outside the regular interval.
#[derive(Message)]
#[rtype(result = "SweepOutcome")]
pub struct Sweep;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, MessageResponse)]
pub struct SweepOutcome {
    pub pinged: usize,
    pub terminated: usize,
}

#[derive(Message)]
#[rtype(result = "usize")]
pub struct ConnectionCount;

/// Cancel the heartbeat, close every connection and stop the registry.
/// Replies with the number of connections that were closed.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct Shutdown;

struct RegisteredConnection {
    remote_addr: String,
    liveness: Liveness,
    recipient: Recipient<ConnectionCommand>,
}

pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, RegisteredConnection>,
    heartbeat_interval: Duration,
    heartbeat: Option<SpawnHandle>,
}

impl ConnectionRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            heartbeat_interval,
            heartbeat: None,
        }
    }

    fn sweep(&mut self) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        self.connections.retain(|id, connection| {
            if connection.liveness.check_and_clear() {
                connection.recipient.do_send(ConnectionCommand::Ping);
                outcome.pinged += 1;
                true
            } else {
                warn!(
                    connection = %id,
                    remote_addr = %connection.remote_addr,
                    "No pong since last heartbeat, terminating connection"
                );
                connection.recipient.do_send(ConnectionCommand::Terminate);
                outcome.terminated += 1;
                false
            }
        });

        if outcome.terminated > 0 || outcome.pinged > 0 {
            debug!(
                pinged = outcome.pinged,
                terminated = outcome.terminated,
                "Heartbeat sweep finished"
            );
        }

        outcome
    }
}

impl Actor for ConnectionRegistry {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(interval_secs = self.heartbeat_interval.as_secs(), "Connection registry started");

        let handle = ctx.run_interval(self.heartbeat_interval, |act, _ctx| {
            act.sweep();
        });
        self.heartbeat = Some(handle);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("Connection registry stopped");
    }
}

impl Handler<Register> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) {
        debug!(connection = %msg.id, remote_addr = %msg.remote_addr, "Connection registered");
        self.connections.insert(
            msg.id,
            RegisteredConnection {
                remote_addr: msg.remote_addr,
                liveness: msg.liveness,
                recipient: msg.recipient,
            },
        );
    }
}

impl Handler<Unregister> for ConnectionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Unregister, _ctx: &mut Self::Context) {
        // Already gone if the heartbeat terminated it.
        if self.connections.remove(&msg.id).is_some() {
            debug!(connection = %msg.id, "Connection unregistered");
        }
    }
}

impl Handler<Sweep> for ConnectionRegistry {
    type Result = SweepOutcome;

    fn handle(&mut self, _msg: Sweep, _ctx: &mut Self::Context) -> Self::Result {
        self.sweep()
    }
}

impl Handler<ConnectionCount> for ConnectionRegistry {
    type Result = usize;

    fn handle(&mut self, _msg: ConnectionCount, _ctx: &mut Self::Context) -> Self::Result {
        self.connections.len()
    }
}

impl Handler<Shutdown> for ConnectionRegistry {
    type Result = usize;

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        if let Some(handle) = self.heartbeat.take() {
            ctx.cancel_future(handle);
        }

        let closed = self.connections.len();
        for (id, connection) in self.connections.drain() {
            debug!(connection = %id, "Closing connection for shutdown");
            connection.recipient.do_send(ConnectionCommand::Close);
        }

        info!(closed, "Connection registry shutting down");
        ctx.stop();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for a socket actor that records the commands it receives.
    #[derive(Default)]
    struct Probe {
        received: Vec<ConnectionCommand>,
    }

    impl Actor for Probe {
        type Context = Context<Self>;
    }

    impl Handler<ConnectionCommand> for Probe {
        type Result = ();

        fn handle(&mut self, msg: ConnectionCommand, _ctx: &mut Self::Context) {
            self.received.push(msg);
        }
    }

    #[derive(Message)]
    #[rtype(result = "Vec<ConnectionCommand>")]
    struct Received;

    impl Handler<Received> for Probe {
        type Result = MessageResult<Received>;

        fn handle(&mut self, _msg: Received, _ctx: &mut Self::Context) -> Self::Result {
            MessageResult(self.received.clone())
        }
    }

    fn idle_registry() -> Addr<ConnectionRegistry> {
        // Long interval so only explicit sweeps run during the test.
        ConnectionRegistry::new(Duration::from_secs(3600)).start()
    }

    async fn register(
        registry: &Addr<ConnectionRegistry>,
        probe: &Addr<Probe>,
    ) -> (ConnectionId, Liveness) {
        let id = ConnectionId::new();
        let liveness = Liveness::new();
        registry
            .send(Register {
                id,
                remote_addr: "127.0.0.1:50000".to_string(),
                liveness: liveness.clone(),
                recipient: probe.clone().recipient(),
            })
            .await
            .unwrap();
        (id, liveness)
    }

    #[test]
    fn test_liveness_flag() {
        let liveness = Liveness::new();
        assert!(liveness.is_alive());
        assert!(liveness.check_and_clear());
        assert!(!liveness.is_alive());
        assert!(!liveness.check_and_clear());

        let shared = liveness.clone();
        shared.mark_alive();
        assert!(liveness.check_and_clear());
    }

    #[actix_web::test]
    async fn test_silent_connection_terminated_on_second_sweep() {
        let registry = idle_registry();
        let probe = Probe::default().start();
        let (_id, liveness) = register(&registry, &probe).await;

        let first = registry.send(Sweep).await.unwrap();
        assert_eq!(first, SweepOutcome { pinged: 1, terminated: 0 });
        assert!(!liveness.is_alive());

        let second = registry.send(Sweep).await.unwrap();
        assert_eq!(second, SweepOutcome { pinged: 0, terminated: 1 });
        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 0);

        let received = probe.send(Received).await.unwrap();
        assert_eq!(received, vec![ConnectionCommand::Ping, ConnectionCommand::Terminate]);
    }

    #[actix_web::test]
    async fn test_pong_keeps_connection_alive() {
        let registry = idle_registry();
        let probe = Probe::default().start();
        let (_id, liveness) = register(&registry, &probe).await;

        for _ in 0..3 {
            let outcome = registry.send(Sweep).await.unwrap();
            assert_eq!(outcome, SweepOutcome { pinged: 1, terminated: 0 });
            liveness.mark_alive();
        }

        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 1);
        let received = probe.send(Received).await.unwrap();
        assert_eq!(received, vec![ConnectionCommand::Ping; 3]);
    }

    #[actix_web::test]
    async fn test_unregister_removes_connection() {
        let registry = idle_registry();
        let probe = Probe::default().start();
        let (id, _liveness) = register(&registry, &probe).await;
        let (_other, _other_liveness) = register(&registry, &probe).await;
        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 2);

        registry.send(Unregister { id }).await.unwrap();
        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 1);

        // Unregistering twice is harmless.
        registry.send(Unregister { id }).await.unwrap();
        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn test_shutdown_closes_every_connection() {
        let registry = idle_registry();
        let probe = Probe::default().start();
        register(&registry, &probe).await;
        register(&registry, &probe).await;

        let closed = registry.send(Shutdown).await.unwrap();
        assert_eq!(closed, 2);

        let received = probe.send(Received).await.unwrap();
        assert_eq!(received, vec![ConnectionCommand::Close, ConnectionCommand::Close]);
    }

    #[actix_web::test]
    async fn test_interval_sweeps_without_being_asked() {
        let registry = ConnectionRegistry::new(Duration::from_millis(50)).start();
        let probe = Probe::default().start();
        register(&registry, &probe).await;

        // Nobody marks the connection alive: ping on the first tick,
        // terminate on the second.
        actix_web::rt::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(registry.send(ConnectionCount).await.unwrap(), 0);
        let received = probe.send(Received).await.unwrap();
        assert_eq!(received, vec![ConnectionCommand::Ping, ConnectionCommand::Terminate]);
    }
}
