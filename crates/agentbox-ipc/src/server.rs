//! Local control socket server and client.

use crate::protocol::{err_response, errors};
use crate::{IpcError, IpcResult};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Deadline for the first newline of a request.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for writing the response.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler function type for socket actions. The handler receives the whole
/// request object and returns the response object.
pub type ActionHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

/// IPC server listening on a filesystem-permission-restricted unix socket.
///
/// Protocol: one newline-delimited JSON request per connection, exactly one
/// JSON response, then close. Each connection runs on its own task so one
/// slow handler cannot block the accept loop.
pub struct IpcServer {
    socket_path: PathBuf,
    handlers: Arc<RwLock<HashMap<String, ActionHandler>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    pub fn new(socket_path: &Path) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            socket_path: socket_path.to_path_buf(),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Register a handler for an action. Handlers are registered at startup,
    /// before `run`.
    pub async fn register_handler<F, Fut>(&self, action: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let boxed: ActionHandler = Box::new(move |request| Box::pin(handler(request)));
        self.handlers.write().await.insert(action.to_string(), boxed);
    }

    /// Get a shutdown receiver.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the server and listen for connections until shutdown.
    pub async fn run(&self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        restrict_to_owner(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "control socket listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handlers = self.handlers.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handlers).await {
                                    debug!(error = %e, "control socket connection error");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "accept error on control socket"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("control socket shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

/// Handle a single client connection: read one request line, dispatch,
/// write one response, close.
async fn handle_connection(
    stream: UnixStream,
    handlers: Arc<RwLock<HashMap<String, ActionHandler>>>,
) -> IpcResult<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    match tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) | Err(_) => return Ok(()), // closed or silent client
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e.into()),
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(());
    }

    debug!(request = %trimmed, "control socket request");
    let response = dispatch(trimmed, &handlers).await;

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&payload)).await {
        Ok(Ok(())) => {
            let _ = writer.flush().await;
        }
        Ok(Err(e)) => warn!(error = %e, "control socket send failed"),
        Err(_) => warn!("control socket send timed out"),
    }
    Ok(())
}

async fn dispatch(raw: &str, handlers: &RwLock<HashMap<String, ActionHandler>>) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "JSON parse error on control socket");
            return err_response(errors::INVALID_JSON);
        }
    };

    if !request.is_object() {
        return err_response(errors::INVALID_PAYLOAD);
    }

    let action = match request.get("action").and_then(Value::as_str) {
        Some(action) => action.to_string(),
        None => {
            warn!("control socket request without action");
            return err_response(errors::MISSING_ACTION);
        }
    };

    debug!(action = %action, "dispatching control socket action");
    let handlers = handlers.read().await;
    match handlers.get(&action) {
        Some(handler) => handler(request).await,
        None => err_response(errors::UNKNOWN_ACTION),
    }
}

fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

/// Client for the control socket, used by host CLI tools.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
        }
    }

    /// Send one request object and read the response.
    pub async fn call(&self, request: Value) -> IpcResult<Value> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| IpcError::Socket(format!("failed to connect: {e}")))?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut payload = serde_json::to_vec(&request)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
        writer.flush().await?;

        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(30), reader.read_line(&mut line))
            .await
            .map_err(|_| IpcError::Timeout)??;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        Ok(serde_json::from_str(line.trim())?)
    }

    /// Whether the daemon answers on the socket at all.
    pub async fn is_daemon_running(&self) -> bool {
        self.call(serde_json::json!({"action": "get_completions", "type": "projects"}))
            .await
            .is_ok()
    }
}
