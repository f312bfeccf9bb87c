//! Named connection ownership and lifecycle.
//!
//! # Responsibilities
//! - Own every upstream transport, keyed by a caller-supplied name
//! - Gate creation through the admission queue
//! - Drive the lifecycle state machine and emit lifecycle events
//! - Frame and optionally encrypt payloads on send / receive

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::admission::{AdmissionPermit, AdmissionQueue};
use crate::config::schema::{CipherConfig, ConnectionsConfig};
use crate::crypto::{CipherAlgorithm, CipherCodec, CipherKey};
use crate::error::{RegistryError, RegistryResult};
use crate::load_balancer::{LoadBalancer, UpstreamTarget};
use crate::net::connection::{ConnectionId, ConnectionState};
use crate::net::dialer::{BoxedStream, Dialer, TransportKind};
use crate::registry::events::{EventBus, LifecycleEvent};

/// Largest read returned by an unencrypted `receive`.
const READ_CHUNK: usize = 64 * 1024;

/// Tunables for [`ConnectionRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Maximum concurrently open (or opening) connections.
    pub max_concurrent: usize,
    /// Default deadline for establishing a transport, TLS handshake included.
    pub connect_timeout: Duration,
    /// Inactivity after which a connection is marked `Idle`; also the TCP
    /// keep-alive interval.
    pub keep_alive: Duration,
    /// Inactivity after which a connection is torn down as `TimedOut`.
    pub idle_timeout: Option<Duration>,
    /// Largest encrypted frame accepted from a peer.
    pub max_frame_len: usize,
    pub cipher: CipherAlgorithm,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            connect_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(60),
            idle_timeout: Some(Duration::from_secs(300)),
            max_frame_len: 16 * 1024 * 1024,
            cipher: CipherAlgorithm::default(),
        }
    }
}

impl RegistryOptions {
    pub fn from_config(connections: &ConnectionsConfig, cipher: &CipherConfig) -> Self {
        Self {
            max_concurrent: connections.max_concurrent,
            connect_timeout: Duration::from_secs(connections.connect_timeout_secs),
            keep_alive: Duration::from_secs(connections.keep_alive_secs),
            idle_timeout: match connections.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_frame_len: connections.max_frame_bytes,
            cipher: cipher.algorithm,
        }
    }
}

/// Point-in-time view of one registered connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub id: ConnectionId,
    pub target: UpstreamTarget,
    pub transport: TransportKind,
    pub state: ConnectionState,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Time since the last send or receive.
    pub idle_ms: u64,
    /// Time left before the idle timeout fires, if one is configured.
    pub idle_deadline_ms: Option<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    id: ConnectionId,
    name: String,
    target: UpstreamTarget,
    transport: TransportKind,
    created_at: SystemTime,
    state: watch::Sender<ConnectionState>,
    reader: AsyncMutex<Option<ReadHalf<BoxedStream>>>,
    writer: AsyncMutex<Option<WriteHalf<BoxedStream>>>,
    last_activity: Mutex<Instant>,
    permit: Mutex<Option<AdmissionPermit>>,
}

impl Connection {
    fn new(name: &str, target: UpstreamTarget, transport: TransportKind) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: ConnectionId::new(),
            name: name.to_string(),
            target,
            transport,
            created_at: SystemTime::now(),
            state,
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            permit: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Apply a one-way transition. Returns false if it is not legal from
    /// the current state, which makes terminal transitions happen once.
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// `Connecting -> Closed` only. Returns false once the open has
    /// completed or the connection has already ended.
    fn abandon(&self) -> bool {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Connecting {
                *current = ConnectionState::Closed;
                true
            } else {
                false
            }
        })
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    fn take_permit(&self) -> Option<AdmissionPermit> {
        lock(&self.permit).take()
    }

    fn ensure_transferable(&self) -> RegistryResult<()> {
        let state = self.state();
        if state.can_transfer() {
            Ok(())
        } else {
            Err(RegistryError::InvalidState {
                name: self.name.clone(),
                state,
            })
        }
    }

    fn info(&self, options: &RegistryOptions) -> ConnectionInfo {
        let idle = self.idle_for();
        ConnectionInfo {
            name: self.name.clone(),
            id: self.id,
            target: self.target.clone(),
            transport: self.transport,
            state: self.state(),
            created_at_ms: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            idle_ms: idle.as_millis() as u64,
            idle_deadline_ms: options
                .idle_timeout
                .map(|limit| limit.saturating_sub(idle).as_millis() as u64),
        }
    }
}

/// How a connection left the registry.
enum Outcome {
    Closed,
    Errored(String),
    TimedOut,
}

impl Outcome {
    fn state(&self) -> ConnectionState {
        match self {
            Outcome::Closed => ConnectionState::Closed,
            Outcome::Errored(_) => ConnectionState::Errored,
            Outcome::TimedOut => ConnectionState::TimedOut,
        }
    }

    fn into_event(self, name: String) -> LifecycleEvent {
        match self {
            Outcome::Closed => LifecycleEvent::Closed { name },
            Outcome::Errored(cause) => LifecycleEvent::Error { name, cause },
            Outcome::TimedOut => LifecycleEvent::Timeout { name },
        }
    }
}

enum Inbound {
    Data(Bytes),
    Eof,
    Oversized(usize),
}

struct RegistryInner {
    connections: DashMap<String, Arc<Connection>>,
    admission: AdmissionQueue,
    balancer: LoadBalancer,
    codec: CipherCodec,
    dialer: Dialer,
    events: EventBus,
    options: RegistryOptions,
}

impl RegistryInner {
    /// Enter a terminal state: remove the entry, emit the event, then
    /// release the admission slot. No-op if already terminal.
    fn finish(&self, conn: &Arc<Connection>, outcome: Outcome) -> bool {
        if !conn.transition(outcome.state()) {
            return false;
        }

        self.connections.remove_if(&conn.name, |_, c| c.id == conn.id);

        // Tear the transport down now unless an in-flight operation holds it;
        // that operation observes the state change and lets go.
        if let Ok(mut writer) = conn.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = conn.reader.try_lock() {
            reader.take();
        }
        let permit = conn.take_permit();

        match &outcome {
            Outcome::Closed => {
                tracing::info!(connection = %conn.name, target = %conn.target, "Connection closed")
            }
            Outcome::Errored(cause) => {
                tracing::warn!(connection = %conn.name, target = %conn.target, error = %cause, "Connection error")
            }
            Outcome::TimedOut => {
                tracing::warn!(connection = %conn.name, target = %conn.target, "Connection timed out")
            }
        }

        self.events.emit(&outcome.into_event(conn.name.clone()));
        drop(permit);
        true
    }
}

/// Removes a name reservation if `open` is abandoned before it completes.
struct Reservation<'a> {
    inner: &'a RegistryInner,
    conn: &'a Arc<Connection>,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed && self.conn.transition(ConnectionState::Closed) {
            self.inner
                .connections
                .remove_if(&self.conn.name, |_, c| c.id == self.conn.id);
            tracing::debug!(connection = %self.conn.name, "Open abandoned before completion");
        }
    }
}

async fn terminated(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|state| state.is_terminal()).await;
}

async fn read_next<R>(reader: &mut R, framed: bool, max_frame_len: usize) -> std::io::Result<Inbound>
where
    R: AsyncRead + Unpin,
{
    if !framed {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = reader.read_buf(&mut buf).await?;
        return Ok(if n == 0 {
            Inbound::Eof
        } else {
            Inbound::Data(buf.freeze())
        });
    }

    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(Inbound::Eof),
        Err(e) => return Err(e),
    };
    if len > max_frame_len {
        // Skip the body so the next read starts at a length prefix.
        let skipped = tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Ok(Inbound::Eof);
        }
        return Ok(Inbound::Oversized(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Inbound::Data(Bytes::from(buf)))
}

/// Pooled, admission-controlled registry of named upstream connections.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.inner.connections.len())
            .field("running", &self.inner.admission.running())
            .field("queued", &self.inner.admission.queued())
            .finish()
    }
}

/// Non-owning handle to a [`ConnectionRegistry`], for event subscribers
/// that must not keep the registry alive.
#[derive(Clone)]
pub struct WeakConnectionRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakConnectionRegistry {
    pub fn upgrade(&self) -> Option<ConnectionRegistry> {
        self.inner.upgrade().map(|inner| ConnectionRegistry { inner })
    }
}

impl ConnectionRegistry {
    pub fn new(options: RegistryOptions, dialer: Dialer, balancer: LoadBalancer) -> Self {
        let admission = AdmissionQueue::new(options.max_concurrent);
        let codec = CipherCodec::new(options.cipher);
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                admission,
                balancer,
                codec,
                dialer,
                events: EventBus::new(),
                options,
            }),
        }
    }

    /// Registry with webpki TLS roots and an empty load-balancer rotation.
    pub fn with_options(options: RegistryOptions) -> Result<Self, std::io::Error> {
        let dialer = Dialer::with_default_roots(Some(options.keep_alive))?;
        Ok(Self::new(options, dialer, LoadBalancer::new()))
    }

    fn get(&self, name: &str) -> RegistryResult<Arc<Connection>> {
        self.inner
            .connections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::UnknownConnection(name.to_string()))
    }

    /// Open a named connection to `target`.
    ///
    /// Waits for an admission slot if the registry is at capacity. The
    /// name is reserved while waiting, so a concurrent open of the same
    /// name fails with `DuplicateName`.
    pub async fn open(
        &self,
        name: &str,
        target: UpstreamTarget,
        transport: TransportKind,
        timeout: Option<Duration>,
    ) -> RegistryResult<ConnectionInfo> {
        let inner = &*self.inner;
        let conn = Arc::new(Connection::new(name, target, transport));

        match inner.connections.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateName(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(conn.clone());
            }
        }
        let mut reservation = Reservation {
            inner,
            conn: &conn,
            armed: true,
        };

        let permit = inner.admission.acquire().await;
        if conn.state().is_terminal() {
            return Err(RegistryError::InvalidState {
                name: name.to_string(),
                state: conn.state(),
            });
        }

        let timeout = timeout.unwrap_or(inner.options.connect_timeout);
        tracing::debug!(
            connection = %name,
            target = %conn.target,
            transport = ?transport,
            timeout_ms = timeout.as_millis() as u64,
            "Opening connection"
        );

        let stream = match tokio::time::timeout(timeout, inner.dialer.connect(&conn.target, transport)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                inner.finish(&conn, Outcome::Errored(e.to_string()));
                return Err(RegistryError::transport(name, e));
            }
            Err(_) => {
                inner.finish(&conn, Outcome::TimedOut);
                return Err(RegistryError::ConnectTimeout {
                    name: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let (reader, writer) = tokio::io::split(stream);
        *conn.reader.lock().await = Some(reader);
        *conn.writer.lock().await = Some(writer);
        *lock(&conn.permit) = Some(permit);
        conn.touch();

        if !conn.transition(ConnectionState::Connected) {
            // Closed while the transport was being established.
            drop(conn.take_permit());
            return Err(RegistryError::InvalidState {
                name: name.to_string(),
                state: conn.state(),
            });
        }
        reservation.armed = false;

        tracing::info!(connection = %name, target = %conn.target, "Connection established");
        inner.events.emit(&LifecycleEvent::Connected {
            name: name.to_string(),
        });
        self.spawn_watchdog(conn.clone());

        Ok(conn.info(&inner.options))
    }

    /// Open a named connection to the next load-balanced target.
    pub async fn open_load_balanced(
        &self,
        name: &str,
        transport: TransportKind,
        timeout: Option<Duration>,
    ) -> RegistryResult<ConnectionInfo> {
        // Do not advance the rotation for a request that cannot succeed.
        if self.contains(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let target = self.inner.balancer.next_target()?;
        self.open(name, target, transport, timeout).await
    }

    /// Write `payload`, encrypted and framed if a key is given.
    ///
    /// Returns the number of bytes written to the transport.
    pub async fn send(&self, name: &str, payload: &[u8], key: Option<&CipherKey>) -> RegistryResult<usize> {
        let inner = &*self.inner;
        let conn = self.get(name)?;
        conn.ensure_transferable()?;

        let sealed: Vec<u8>;
        let frame: &[u8] = match key {
            Some(key) => {
                let encryption = || RegistryError::Encryption {
                    name: name.to_string(),
                };
                let envelope = inner.codec.seal(payload, key).map_err(|_| encryption())?;
                let len = u32::try_from(envelope.len()).map_err(|_| encryption())?;
                let mut buf = Vec::with_capacity(4 + envelope.len());
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(&envelope);
                sealed = buf;
                &sealed
            }
            None => payload,
        };

        let result = {
            let mut guard = conn.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(RegistryError::InvalidState {
                    name: name.to_string(),
                    state: conn.state(),
                });
            };
            match writer.write_all(frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => {
                conn.touch();
                tracing::trace!(connection = %name, bytes = frame.len(), "Data sent");
                inner.events.emit(&LifecycleEvent::DataSent {
                    name: name.to_string(),
                    bytes: frame.len(),
                });
                Ok(frame.len())
            }
            Err(e) => {
                inner.finish(&conn, Outcome::Errored(e.to_string()));
                Err(RegistryError::transport(name, e))
            }
        }
    }

    /// Wait for the next inbound payload.
    ///
    /// Without a key this is the next chunk read from the transport. With a
    /// key it is the next encrypted frame, decrypted. Resolves `Ok(None)` once
    /// the connection reaches a terminal state (peer EOF included). A failed
    /// decryption leaves the connection state untouched. A frame longer than
    /// `max_frame_len` is read and discarded, then reported as a decryption
    /// failure, so the following frame is still readable.
    pub async fn receive(&self, name: &str, key: Option<&CipherKey>) -> RegistryResult<Option<Bytes>> {
        let inner = &*self.inner;
        let conn = self.get(name)?;
        conn.ensure_transferable()?;
        let mut state_rx = conn.state.subscribe();

        let read = {
            let mut guard = conn.reader.lock().await;
            let Some(reader) = guard.as_mut() else {
                return Ok(None);
            };
            tokio::select! {
                result = read_next(reader, key.is_some(), inner.options.max_frame_len) => result,
                _ = terminated(&mut state_rx) => return Ok(None),
            }
        };

        match read {
            Err(e) => {
                inner.finish(&conn, Outcome::Errored(e.to_string()));
                Err(RegistryError::transport(name, e))
            }
            Ok(Inbound::Eof) => {
                tracing::debug!(connection = %name, "Peer closed connection");
                inner.finish(&conn, Outcome::Closed);
                Ok(None)
            }
            Ok(Inbound::Oversized(len)) => {
                tracing::warn!(
                    connection = %name,
                    frame_len = len,
                    max_frame_len = inner.options.max_frame_len,
                    "Rejected oversized encrypted frame"
                );
                Err(RegistryError::Decryption {
                    name: name.to_string(),
                })
            }
            Ok(Inbound::Data(bytes)) => {
                conn.touch();
                let payload = match key {
                    Some(key) => match inner.codec.open(&bytes, key) {
                        Ok(plaintext) => Bytes::from(plaintext),
                        Err(e) => {
                            tracing::warn!(connection = %name, error = %e, "Failed to decrypt inbound frame");
                            return Err(RegistryError::Decryption {
                                name: name.to_string(),
                            });
                        }
                    },
                    None => bytes,
                };
                tracing::trace!(connection = %name, bytes = payload.len(), "Data received");
                inner.events.emit(&LifecycleEvent::DataReceived {
                    name: name.to_string(),
                    bytes: payload.len(),
                });
                Ok(Some(payload))
            }
        }
    }

    /// Gracefully shut the transport down and transition to `Closed`.
    ///
    /// Closing a name whose open is still queued or dialing cancels that
    /// open instead: the pending `open` fails with `InvalidState` and no
    /// lifecycle event is emitted, since `Connected` never was.
    pub async fn close(&self, name: &str) -> RegistryResult<()> {
        let conn = self.get(name)?;
        if conn.abandon() {
            self.inner
                .connections
                .remove_if(&conn.name, |_, c| c.id == conn.id);
            tracing::debug!(connection = %name, "Pending open cancelled");
            return Ok(());
        }
        {
            let mut guard = conn.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                match tokio::time::timeout(self.inner.options.connect_timeout, writer.shutdown()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!(connection = %name, error = %e, "Shutdown error ignored"),
                    Err(_) => tracing::debug!(connection = %name, "Shutdown timed out"),
                }
            }
        }
        self.inner.finish(&conn, Outcome::Closed);
        Ok(())
    }

    /// Close every registered connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let names = self.names();
        let results = futures_util::future::join_all(names.iter().map(|name| self.close(name))).await;
        let closed = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!(closed, "All connections closed");
        closed
    }

    fn spawn_watchdog(&self, conn: Arc<Connection>) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let keep_alive = self.inner.options.keep_alive;
        let idle_timeout = self.inner.options.idle_timeout;

        tokio::spawn(async move {
            let mut state_rx = conn.state.subscribe();
            loop {
                let state = conn.state();
                if state.is_terminal() {
                    break;
                }
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let idle = conn.idle_for();
                let mut wake: Option<Duration> = None;

                if state == ConnectionState::Connected {
                    if idle >= keep_alive {
                        if conn.transition(ConnectionState::Idle) {
                            tracing::debug!(connection = %conn.name, idle_ms = idle.as_millis() as u64, "Connection idle");
                            inner.events.emit(&LifecycleEvent::Idle {
                                name: conn.name.clone(),
                            });
                        }
                        continue;
                    }
                    wake = Some(keep_alive - idle);
                }

                if let Some(limit) = idle_timeout {
                    if idle >= limit {
                        inner.finish(&conn, Outcome::TimedOut);
                        break;
                    }
                    let remaining = limit - idle;
                    wake = Some(wake.map_or(remaining, |w| w.min(remaining)));
                }
                drop(inner);

                match wake {
                    Some(wake) => tokio::select! {
                        _ = tokio::time::sleep(wake) => {}
                        _ = terminated(&mut state_rx) => break,
                    },
                    None => {
                        terminated(&mut state_rx).await;
                        break;
                    }
                }
            }
        });
    }

    pub fn downgrade(&self) -> WeakConnectionRegistry {
        WeakConnectionRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.connections.contains_key(name)
    }

    /// Current state of a registered connection.
    pub fn state(&self, name: &str) -> Option<ConnectionState> {
        self.inner.connections.get(name).map(|c| c.state())
    }

    pub fn info(&self, name: &str) -> RegistryResult<ConnectionInfo> {
        Ok(self.get(name)?.info(&self.inner.options))
    }

    /// Names of all registered connections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Info for all registered connections, sorted by name.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.value().info(&self.inner.options))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.inner.balancer
    }

    pub fn admission(&self) -> &AdmissionQueue {
        &self.inner.admission
    }

    pub fn codec(&self) -> &CipherCodec {
        &self.inner.codec
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::with_options(RegistryOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn unknown_names_are_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.send("nope", b"x", None).await,
            Err(RegistryError::UnknownConnection(_))
        ));
        assert!(matches!(
            reg.receive("nope", None).await,
            Err(RegistryError::UnknownConnection(_))
        ));
        assert!(matches!(reg.close("nope").await, Err(RegistryError::UnknownConnection(_))));
        assert!(reg.info("nope").is_err());
    }

    #[tokio::test]
    async fn load_balanced_open_needs_targets() {
        let reg = registry();
        let result = reg.open_load_balanced("lb", TransportKind::Plain, None).await;
        assert!(matches!(result, Err(RegistryError::NoTargets)));
        assert!(reg.is_empty());
        assert_eq!(reg.admission().running(), 0);
    }

    #[test]
    fn options_from_config() {
        let mut connections = ConnectionsConfig::default();
        connections.idle_timeout_secs = 0;
        connections.max_concurrent = 3;
        let options = RegistryOptions::from_config(&connections, &CipherConfig::default());
        assert_eq!(options.max_concurrent, 3);
        assert!(options.idle_timeout.is_none());
    }
}
