//! SSH connection manager.
//!
//! One `TunnelServer` accepts container agents on a unix socket, keeps at
//! most one live connection per container name, pumps the control channel,
//! and owns every installed port forward.

use crate::connection::{Connection, RemoteForward, RemoteIntent};
use crate::{AllowedPorts, BindAddresses, TunnelError};
use agentbox_control::{dispatch_message, ControlChannel, HandlerRegistry};
use agentbox_proto::{
    encode_frame, ControlMessage, ForwardDirection, FrameDecoder, FrameError, MessageKind,
    PortForward,
};
use russh::keys::{Algorithm, PrivateKey};
use russh::server::{Auth, Config as SshConfig, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, Disconnect};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a freshly accepted connection may go without opening its control
/// channel before it is closed.
const CONTROL_CHANNEL_GRACE: Duration = Duration::from_secs(10);
/// Outbound frame queue depth per connection.
const OUTBOUND_QUEUE: usize = 256;
/// Inbound dispatch queue depth per connection.
const INBOUND_QUEUE: usize = 256;
/// Consecutive malformed frames tolerated before the connection is closed.
const MAX_MALFORMED_FRAMES: u32 = 3;
/// Target hosts containers may reach through direct-tcpip channels.
const ALLOWED_FORWARD_HOSTS: &[&str] = &["127.0.0.1", "localhost", "::1"];

/// Typed observer for connection lifecycle transitions. Kept separate from
/// the wire selector namespace on purpose: these originate locally.
pub trait ConnectionObserver: Send + Sync {
    fn container_connected(&self, _container: &str) {}
    fn container_disconnected(&self, _container: &str) {}
}

/// The SSH connection manager (C3 + C4).
pub struct TunnelServer {
    socket_path: PathBuf,
    bind: Arc<BindAddresses>,
    allowed_ports: Arc<AllowedPorts>,
    connections: Mutex<HashMap<String, Connection>>,
    /// Host ports bound in the remote direction, across all connections.
    remote_ports: Mutex<HashSet<u16>>,
    registry: OnceLock<Arc<HandlerRegistry>>,
    observers: Mutex<Vec<Arc<dyn ConnectionObserver>>>,
    shutdown_tx: broadcast::Sender<()>,
    next_conn_id: AtomicU64,
}

impl TunnelServer {
    pub fn new(socket_path: PathBuf, bind: Arc<BindAddresses>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            socket_path,
            bind,
            allowed_ports: Arc::new(AllowedPorts::new()),
            connections: Mutex::new(HashMap::new()),
            remote_ports: Mutex::new(HashSet::new()),
            registry: OnceLock::new(),
            observers: Mutex::new(Vec::new()),
            shutdown_tx,
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// Install the control-channel handler registry. Called once at startup;
    /// the registry is immutable afterwards.
    pub fn install_handlers(&self, registry: HandlerRegistry) {
        if self.registry.set(Arc::new(registry)).is_err() {
            panic!("control handler registry installed twice");
        }
    }

    /// Register a lifecycle observer. Called at startup, before `run`.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .push(observer);
    }

    pub fn bind_addresses(&self) -> &Arc<BindAddresses> {
        &self.bind
    }

    /// Trigger shutdown of the accept loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Accept connections until shutdown, then close every live connection
    /// and wait for their dispatchers to drain.
    pub async fn run(self: &Arc<Self>) -> Result<(), TunnelError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        restrict_to_owner(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "SSH tunnel server listening");

        let host_key = PrivateKey::random(
            &mut russh::keys::rand_core::UnwrapErr(getrandom::SysRng),
            Algorithm::Ed25519,
        )
        .map_err(|e| TunnelError::HostKey(e.to_string()))?;
        let config = Arc::new(SshConfig {
            auth_rejection_time: Duration::from_secs(1),
            keys: vec![host_key],
            ..Default::default()
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => self.spawn_session(config.clone(), stream),
                        Err(e) => error!(error = %e, "accept error on SSH socket"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("SSH tunnel server shutting down");
                    break;
                }
            }
        }

        self.close_all_connections().await;
        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    fn spawn_session(self: &Arc<Self>, config: Arc<SshConfig>, stream: UnixStream) {
        let server = self.clone();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handler = ClientHandler::new(server.clone(), conn_id);

        tokio::spawn(async move {
            match russh::server::run_stream(config, stream, handler).await {
                Ok(session) => {
                    let handle = session.handle();
                    let grace_server = server.clone();
                    let grace = tokio::spawn(async move {
                        tokio::time::sleep(CONTROL_CHANNEL_GRACE).await;
                        if !grace_server.has_connection_id(conn_id) {
                            debug!(conn_id, "no control channel within grace period, closing");
                            let _ = handle
                                .disconnect(
                                    Disconnect::ByApplication,
                                    "control channel not opened".to_string(),
                                    "".to_string(),
                                )
                                .await;
                        }
                    });

                    if let Err(e) = session.await {
                        debug!(conn_id, error = %e, "SSH session ended with error");
                    }
                    grace.abort();
                    server.connection_closed(conn_id).await;
                }
                Err(e) => debug!(error = %e, "SSH handshake failed"),
            }
        });
    }

    // ---- connection registry -------------------------------------------

    /// Admit a container's control channel, superseding any existing
    /// connection with the same name. The old connection is removed and
    /// closed before the new one is inserted.
    async fn admit(
        self: &Arc<Self>,
        name: &str,
        conn_id: u64,
        handle: Handle,
        control_channel: ChannelId,
    ) -> (ControlChannel, mpsc::Sender<ControlMessage>) {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_QUEUE);
        let control = ControlChannel::new(name, out_tx);

        let writer_task = tokio::spawn(writer_loop(
            handle.clone(),
            control_channel,
            out_rx,
            name.to_string(),
        ));
        let dispatcher_task = tokio::spawn(dispatcher_loop(self.clone(), control.clone(), in_rx));

        let old = self
            .connections
            .lock()
            .expect("connections lock poisoned")
            .remove(name);

        if let Some(old) = old {
            info!(container = %name, "replacing existing connection");
            let _ = self.teardown(old, "superseded by new connection").await;
            self.notify_disconnected(name);
        }

        let connection = Connection {
            conn_id,
            name: name.to_string(),
            connected_at: chrono::Utc::now(),
            handle,
            control_channel,
            control: control.clone(),
            local_forwards: Vec::new(),
            remote_forwards: Vec::new(),
            pending_remote: HashMap::new(),
            writer_task,
            dispatcher_task,
        };

        self.connections
            .lock()
            .expect("connections lock poisoned")
            .insert(name.to_string(), connection);

        info!(container = %name, "container connected");
        self.notify_connected(name);

        (control, in_tx)
    }

    /// Remove and clean up the connection identified by `conn_id`, if it is
    /// still the registered one for its name (a replaced connection was
    /// already cleaned up by `admit`).
    async fn connection_closed(self: &Arc<Self>, conn_id: u64) {
        let removed = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            let name = conns
                .iter()
                .find(|(_, c)| c.conn_id == conn_id)
                .map(|(name, _)| name.clone());
            name.and_then(|n| conns.remove(&n))
        };

        if let Some(conn) = removed {
            let name = conn.name.clone();
            let uptime = chrono::Utc::now() - conn.connected_at;
            info!(
                container = %name,
                uptime_secs = uptime.num_seconds(),
                "container disconnected"
            );
            let _ = self.teardown(conn, "transport closed").await;
            self.notify_disconnected(&name);
        }
    }

    /// Release everything a connection owns: pending waiters, forwards,
    /// listeners, allow-set claims, tasks, and finally the transport.
    /// Returns the dispatcher task so shutdown can wait for it to drain.
    async fn teardown(&self, mut conn: Connection, reason: &str) -> JoinHandle<()> {
        conn.control.fail_pending();

        for forward in conn.remote_forwards.iter_mut() {
            forward.abort_listeners();
            self.remote_ports
                .lock()
                .expect("remote ports lock poisoned")
                .remove(&forward.forward.host_port);
        }
        for forward in &conn.local_forwards {
            self.allowed_ports.release(forward.host_port);
        }

        conn.writer_task.abort();
        let _ = conn.handle.close(conn.control_channel).await;
        let _ = conn
            .handle
            .disconnect(Disconnect::ByApplication, reason.to_string(), "".to_string())
            .await;

        // The dispatcher drains on its own once the closing session drops
        // its inbound sender.
        conn.dispatcher_task
    }

    async fn close_all_connections(&self) {
        let drained: Vec<Connection> = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            conns.drain().map(|(_, c)| c).collect()
        };

        let mut dispatchers = Vec::new();
        for conn in drained {
            let name = conn.name.clone();
            dispatchers.push(self.teardown(conn, "daemon shutting down").await);
            self.notify_disconnected(&name);
        }

        for dispatcher in dispatchers {
            if tokio::time::timeout(Duration::from_secs(5), dispatcher)
                .await
                .is_err()
            {
                warn!("dispatcher did not drain within 5s on shutdown");
            }
        }
    }

    fn has_connection_id(&self, conn_id: u64) -> bool {
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .values()
            .any(|c| c.conn_id == conn_id)
    }

    fn notify_connected(&self, name: &str) {
        let observers = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .clone();
        for observer in observers {
            observer.container_connected(name);
        }
    }

    fn notify_disconnected(&self, name: &str) {
        let observers = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .clone();
        for observer in observers {
            observer.container_disconnected(name);
        }
    }

    // ---- outbound API ---------------------------------------------------

    /// Send a request to a container and wait for the correlated response.
    pub async fn request(
        &self,
        container: &str,
        msg_type: &str,
        payload: Value,
        deadline: Duration,
    ) -> Result<Value, TunnelError> {
        let control = self.control_for(container)?;
        Ok(control.request(msg_type, payload, deadline).await?)
    }

    /// Send a fire-and-forget event to a container.
    pub async fn send_event(
        &self,
        container: &str,
        msg_type: &str,
        payload: Value,
    ) -> Result<(), TunnelError> {
        let control = self.control_for(container)?;
        Ok(control.send_event(msg_type, payload).await?)
    }

    fn control_for(&self, container: &str) -> Result<ControlChannel, TunnelError> {
        // Copy the channel handle out under the lock; the write happens
        // without it so a slow container cannot block the registry.
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .get(container)
            .map(|c| c.control.clone())
            .ok_or_else(|| TunnelError::NotConnected(container.to_string()))
    }

    pub fn is_connected(&self, container: &str) -> bool {
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .contains_key(container)
    }

    pub fn connected_containers(&self) -> Vec<String> {
        self.connections
            .lock()
            .expect("connections lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    // ---- forward registry ----------------------------------------------

    /// Record a local-direction forward: claim the allow-set entry so the
    /// container's direct-tcpip channels toward `host_port` are accepted.
    pub fn install_local_forward(
        &self,
        container: &str,
        host_port: u16,
        container_port: u16,
        name: &str,
    ) -> Result<(), TunnelError> {
        let mut conns = self.connections.lock().expect("connections lock poisoned");
        let conn = conns
            .get_mut(container)
            .ok_or_else(|| TunnelError::NotConnected(container.to_string()))?;

        if conn.has_local_forward(host_port) {
            return Err(TunnelError::Conflict(format!(
                "local forward for host port {host_port} already installed"
            )));
        }

        self.allowed_ports.claim(host_port);
        conn.local_forwards.push(PortForward {
            name: name.to_string(),
            host_port,
            container_port,
            direction: ForwardDirection::Local,
        });
        info!(container = %container, host_port, container_port, "local forward installed");
        Ok(())
    }

    /// Drop a local-direction forward and release its allow-set claim.
    pub fn remove_local_forward(&self, container: &str, host_port: u16) {
        let removed = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            conns
                .get_mut(container)
                .and_then(|c| c.remove_local_forward(host_port))
        };
        if removed.is_some() {
            self.allowed_ports.release(host_port);
            info!(container = %container, host_port, "local forward removed");
        }
    }

    /// Record the container-side details of an upcoming remote forward so
    /// the tcpip-forward request that follows can be booked correctly.
    pub fn note_remote_intent(
        &self,
        container: &str,
        host_port: u16,
        container_port: u16,
        name: &str,
    ) -> Result<(), TunnelError> {
        let mut conns = self.connections.lock().expect("connections lock poisoned");
        let conn = conns
            .get_mut(container)
            .ok_or_else(|| TunnelError::NotConnected(container.to_string()))?;
        conn.pending_remote.insert(
            host_port,
            RemoteIntent {
                container_port,
                name: name.to_string(),
            },
        );
        Ok(())
    }

    /// Install a remote-direction forward: bind a listener on every address
    /// in the current bind set and splice accepted connections into
    /// forwarded-tcpip channels toward the container.
    async fn install_remote_forward(
        self: &Arc<Self>,
        container: &str,
        conn_id: u64,
        client_address: &str,
        host_port: u16,
        handle: Handle,
    ) -> Result<(), TunnelError> {
        if host_port < 1024 {
            return Err(TunnelError::PrivilegedPort(host_port));
        }

        {
            let mut ports = self.remote_ports.lock().expect("remote ports lock poisoned");
            if !ports.insert(host_port) {
                return Err(TunnelError::Conflict(format!(
                    "host port {host_port} is already forwarded"
                )));
            }
        }

        let intent = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            match conns.get_mut(container) {
                Some(conn) if conn.conn_id == conn_id => conn.pending_remote.remove(&host_port),
                _ => {
                    self.release_remote_port(host_port);
                    return Err(TunnelError::NotConnected(container.to_string()));
                }
            }
        };
        let (container_port, forward_name) = match intent {
            Some(intent) => (intent.container_port, intent.name),
            None => (host_port, format!("dynamic-{host_port}")),
        };

        let listeners = match self
            .bind_remote_listeners(client_address, host_port, handle)
            .await
        {
            Ok(listeners) => listeners,
            Err(e) => {
                self.release_remote_port(host_port);
                return Err(e);
            }
        };

        let forward = RemoteForward {
            forward: PortForward {
                name: forward_name,
                host_port,
                container_port,
                direction: ForwardDirection::Remote,
            },
            client_address: client_address.to_string(),
            listeners,
        };

        let mut conns = self.connections.lock().expect("connections lock poisoned");
        match conns.get_mut(container) {
            Some(conn) if conn.conn_id == conn_id => {
                conn.remote_forwards.push(forward);
                info!(container = %container, host_port, container_port, "remote forward installed");
                Ok(())
            }
            _ => {
                // The connection vanished while we were binding.
                let mut forward = forward;
                forward.abort_listeners();
                drop(conns);
                self.release_remote_port(host_port);
                Err(TunnelError::NotConnected(container.to_string()))
            }
        }
    }

    /// Bind all addresses or none: a partial failure releases what was
    /// already bound.
    async fn bind_remote_listeners(
        &self,
        client_address: &str,
        host_port: u16,
        handle: Handle,
    ) -> Result<Vec<JoinHandle<()>>, TunnelError> {
        let addresses = self.bind.resolve();
        let mut bound = Vec::new();

        for addr in &addresses {
            match TcpListener::bind(SocketAddr::new(*addr, host_port)).await {
                Ok(listener) => bound.push(listener),
                Err(e) => {
                    return Err(TunnelError::InstallFailed(format!(
                        "failed to bind {addr}:{host_port}: {e}"
                    )));
                }
            }
        }

        let mut tasks = Vec::with_capacity(bound.len());
        for listener in bound {
            tasks.push(tokio::spawn(remote_accept_loop(
                listener,
                handle.clone(),
                client_address.to_string(),
                host_port,
            )));
        }
        Ok(tasks)
    }

    /// Remove a remote-direction forward, closing its listeners. In-flight
    /// spliced connections are left to drain.
    pub fn remove_remote_forward(&self, container: &str, host_port: u16) -> Result<(), TunnelError> {
        let removed = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            let conn = conns
                .get_mut(container)
                .ok_or_else(|| TunnelError::NotConnected(container.to_string()))?;
            conn.remove_remote_forward(host_port)
        };

        match removed {
            Some(mut forward) => {
                forward.abort_listeners();
                self.release_remote_port(host_port);
                info!(container = %container, host_port, "remote forward removed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn release_remote_port(&self, host_port: u16) {
        self.remote_ports
            .lock()
            .expect("remote ports lock poisoned")
            .remove(&host_port);
    }

    /// Re-bind every remote-direction listener against the current bind
    /// set. A forward that cannot be re-bound is dropped.
    pub async fn rebind_remote_listeners(self: &Arc<Self>) {
        let targets: Vec<(String, u64, String, u16, Handle)> = {
            let mut conns = self.connections.lock().expect("connections lock poisoned");
            let mut targets = Vec::new();
            for conn in conns.values_mut() {
                for forward in conn.remote_forwards.iter_mut() {
                    forward.abort_listeners();
                    targets.push((
                        conn.name.clone(),
                        conn.conn_id,
                        forward.client_address.clone(),
                        forward.forward.host_port,
                        conn.handle.clone(),
                    ));
                }
            }
            targets
        };

        for (container, conn_id, client_address, host_port, handle) in targets {
            match self
                .bind_remote_listeners(&client_address, host_port, handle)
                .await
            {
                Ok(tasks) => {
                    let mut conns = self.connections.lock().expect("connections lock poisoned");
                    if let Some(conn) = conns.get_mut(&container) {
                        if conn.conn_id == conn_id {
                            if let Some(fwd) = conn
                                .remote_forwards
                                .iter_mut()
                                .find(|f| f.forward.host_port == host_port)
                            {
                                fwd.listeners = tasks;
                                continue;
                            }
                        }
                    }
                    // Forward vanished while rebinding.
                    for task in tasks {
                        task.abort();
                    }
                }
                Err(e) => {
                    error!(
                        container = %container,
                        host_port,
                        error = %e,
                        "failed to rebind remote forward, dropping it"
                    );
                    let _ = self.remove_remote_forward(&container, host_port);
                }
            }
        }
    }

    /// Whether a direct-tcpip target is acceptable: the host must be local
    /// and the port must carry at least one live allow-set claim.
    fn direct_tcpip_allowed(&self, host: &str, port: u16) -> bool {
        ALLOWED_FORWARD_HOSTS.contains(&host) && self.allowed_ports.is_allowed(port)
    }
}

/// Serialize and write outbound frames for one connection. Runs until the
/// queue closes or a write fails.
async fn writer_loop(
    handle: Handle,
    channel: ChannelId,
    mut rx: mpsc::Receiver<ControlMessage>,
    container: String,
) {
    while let Some(msg) = rx.recv().await {
        let bytes = match encode_frame(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(container = %container, error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if handle.data(channel, bytes::Bytes::from(bytes)).await.is_err() {
            debug!(container = %container, "control channel write failed");
            break;
        }
    }
}

/// Serially dispatch inbound requests and events for one connection.
async fn dispatcher_loop(
    server: Arc<TunnelServer>,
    control: ControlChannel,
    mut rx: mpsc::Receiver<ControlMessage>,
) {
    while let Some(msg) = rx.recv().await {
        match server.registry.get() {
            Some(registry) => dispatch_message(registry, &control, msg).await,
            None => warn!("control message received before handlers were installed"),
        }
    }
}

/// Accept loop for one remote-forward listener: every TCP connection becomes
/// a forwarded-tcpip channel spliced to the container.
async fn remote_accept_loop(
    listener: TcpListener,
    handle: Handle,
    connected_address: String,
    host_port: u16,
) {
    loop {
        match listener.accept().await {
            Ok((tcp, peer)) => {
                let handle = handle.clone();
                let connected_address = connected_address.clone();
                tokio::spawn(async move {
                    match handle
                        .channel_open_forwarded_tcpip(
                            connected_address,
                            host_port as u32,
                            peer.ip().to_string(),
                            peer.port() as u32,
                        )
                        .await
                    {
                        Ok(channel) => splice(channel, tcp).await,
                        Err(e) => {
                            debug!(host_port, error = %e, "failed to open forwarded-tcpip channel")
                        }
                    }
                });
            }
            Err(e) => {
                debug!(host_port, error = %e, "remote listener accept failed");
                break;
            }
        }
    }
}

/// Copy bytes both ways until either side half-closes.
async fn splice(channel: Channel<Msg>, mut tcp: TcpStream) {
    let mut stream = channel.into_stream();
    let _ = tokio::io::copy_bidirectional(&mut stream, &mut tcp).await;
}

fn restrict_to_owner(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Per-client SSH handler. The offered username is the container name; any
/// credential is accepted, since the unix socket's permissions are the
/// security boundary.
struct ClientHandler {
    server: Arc<TunnelServer>,
    conn_id: u64,
    username: Option<String>,
    control_channel: Option<ChannelId>,
    control: Option<ControlChannel>,
    inbound: Option<mpsc::Sender<ControlMessage>>,
    decoder: FrameDecoder,
    malformed_frames: u32,
}

impl ClientHandler {
    fn new(server: Arc<TunnelServer>, conn_id: u64) -> Self {
        Self {
            server,
            conn_id,
            username: None,
            control_channel: None,
            control: None,
            inbound: None,
            decoder: FrameDecoder::new(),
            malformed_frames: 0,
        }
    }

    fn container(&self) -> Result<&str, TunnelError> {
        self.username
            .as_deref()
            .ok_or_else(|| TunnelError::NotConnected("<unauthenticated>".to_string()))
    }
}

impl Handler for ClientHandler {
    type Error = TunnelError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.username = Some(user.to_string());
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.control_channel.is_some() {
            debug!(conn_id = self.conn_id, "refusing extra session channel");
            return Ok(false);
        }
        let name = self.container()?.to_string();

        let channel_id = channel.id();
        self.control_channel = Some(channel_id);

        let (control, inbound) = self
            .server
            .admit(&name, self.conn_id, session.handle(), channel_id)
            .await;
        self.control = Some(control);
        self.inbound = Some(inbound);
        Ok(true)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) != self.control_channel {
            return Ok(());
        }

        self.decoder.extend(data);
        loop {
            match self.decoder.next_frame() {
                Ok(Some(msg)) => {
                    self.malformed_frames = 0;
                    if msg.kind == MessageKind::Response {
                        // Correlate eagerly so responses never queue behind
                        // the serial dispatcher.
                        if let (Some(control), Some(id)) = (&self.control, &msg.id) {
                            control.complete_response(id, msg.payload);
                        }
                        continue;
                    }
                    if let Some(inbound) = &self.inbound {
                        if inbound.send(msg).await.is_err() {
                            return Err(TunnelError::TransportClosed);
                        }
                    }
                }
                Ok(None) => break,
                Err(FrameError::Oversize { len, max }) => {
                    warn!(len, max, "oversize frame, closing connection");
                    return Err(TunnelError::InstallFailed(format!(
                        "frame of {len} bytes exceeds cap"
                    )));
                }
                Err(FrameError::Json(e)) => {
                    self.malformed_frames += 1;
                    warn!(
                        error = %e,
                        count = self.malformed_frames,
                        "malformed control frame"
                    );
                    if self.malformed_frames >= MAX_MALFORMED_FRAMES {
                        return Err(TunnelError::TransportClosed);
                    }
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) == self.control_channel {
            // The agent half-closed its control channel; treat the
            // connection as gone.
            return Err(TunnelError::TransportClosed);
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) == self.control_channel {
            return Err(TunnelError::TransportClosed);
        }
        Ok(())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let port = port_to_connect as u16;
        if !self.server.direct_tcpip_allowed(host_to_connect, port) {
            debug!(
                conn_id = self.conn_id,
                host = %host_to_connect,
                port,
                "rejecting direct-tcpip channel outside the allow-set"
            );
            return Ok(false);
        }

        match TcpStream::connect((IpAddr::from([127, 0, 0, 1]), port)).await {
            Ok(tcp) => {
                tokio::spawn(splice(channel, tcp));
                Ok(true)
            }
            Err(e) => {
                debug!(port, error = %e, "direct-tcpip target connection failed");
                Ok(false)
            }
        }
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let name = self.container()?.to_string();
        let host_port = *port as u16;

        match self
            .server
            .install_remote_forward(&name, self.conn_id, address, host_port, session.handle())
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(container = %name, host_port, error = %e, "remote forward refused");
                Ok(false)
            }
        }
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let name = self.container()?.to_string();
        match self.server.remove_remote_forward(&name, port as u16) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
