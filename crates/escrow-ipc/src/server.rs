//! IPC server implementation

use escrow_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response,
};
use escrow_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_BUFFER: usize = 256;

/// Message from client to server
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type Clients = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Clients,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

/// Role granted to a peer: root and the service's own user administer,
/// other known users participate, and a peer without credentials can only
/// observe.
pub fn role_for_uid(uid: Option<u32>, service_uid: u32) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == service_uid => ClientRole::Admin,
        Some(_) => ClientRole::Participant,
        None => ClientRole::Observer,
    }
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove a stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        let service_uid = nix::unistd::getuid().as_raw();

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, service_uid);

                    let info = ClientInfo::new(role);
                    let info = match uid {
                        Some(u) => info.with_uid(u),
                        None => info,
                    };

                    debug!(client_id = %info.client_id, uid = ?uid, role = ?role, "Accepted connection");

                    self.handle_client(stream, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, info: ClientInfo) {
        let client_id = info.client_id;
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id,
            ClientHandle {
                info: info.clone(),
                response_tx: response_tx.clone(),
                subscribed: false,
            },
        );

        let _ = self
            .message_tx
            .send(ServerMessage::ClientConnected { client_id, info });

        tokio::spawn(read_requests(
            read_half,
            client_id,
            self.clients.clone(),
            self.message_tx.clone(),
            response_tx,
        ));

        let mut event_rx = self.event_tx.subscribe();
        let clients = self.clients.clone();

        // Ends once the reader has deregistered the client and every
        // response sender is gone, or on the first write error
        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                tokio::select! {
                    response = response_rx.recv() => {
                        let Some(mut msg) = response else { break };
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %client_id, error = %e, "Write error");
                            break;
                        }
                    }

                    received = event_rx.recv() => {
                        let event = match received {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(client_id = %client_id, missed, "Subscriber lagging, events dropped");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        let subscribed = clients
                            .read()
                            .await
                            .get(&client_id)
                            .is_some_and(|h| h.subscribed);
                        if !subscribed {
                            continue;
                        }

                        match serde_json::to_string(&event) {
                            Ok(mut msg) => {
                                msg.push('\n');
                                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                    debug!(client_id = %client_id, error = %e, "Event write error");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to serialize event"),
                        }
                    }
                }
            }
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get client info
    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read NDJSON requests until EOF, forwarding each to the service loop
async fn read_requests(
    read_half: OwnedReadHalf,
    client_id: ClientId,
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    response_tx: mpsc::UnboundedSender<String>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client_id = %client_id, "Client disconnected (EOF)");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        let subscription = match request.command {
                            Command::SubscribeEvents => Some(true),
                            Command::UnsubscribeEvents => Some(false),
                            _ => None,
                        };
                        if let Some(subscribed) = subscription {
                            let mut clients = clients.write().await;
                            if let Some(handle) = clients.get_mut(&client_id) {
                                handle.subscribed = subscribed;
                            }
                        }

                        let _ = message_tx.send(ServerMessage::Request { client_id, request });
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Invalid request");
                        let response = Response::error(
                            0,
                            ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                        );
                        if let Ok(json) = serde_json::to_string(&response) {
                            let _ = response_tx.send(json);
                        }
                    }
                }
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        }
    }

    clients.write().await.remove(&client_id);
    let _ = message_tx.send(ServerMessage::ClientDisconnected { client_id });
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials)
        .ok()
        .map(|cred| cred.uid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use escrow_api::{ResponsePayload, ResponseResult};
    use escrow_util::AccountId;
    use tempfile::tempdir;

    #[test]
    fn roles_from_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Participant);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Observer);
    }

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        server.shutdown();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("escrow.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let mut messages = server.take_message_receiver().await.unwrap();

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        // Answer every request with Pong, echoing the request id
        let responder = server.clone();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                match msg {
                    ServerMessage::ClientConnected { info, .. } => {
                        let _ = seen_tx.send(info);
                    }
                    ServerMessage::Request { client_id, request } => {
                        assert_eq!(request.caller, Some(AccountId::new("alice")));
                        let response = Response::success(request.request_id, ResponsePayload::Pong);
                        responder.send_response(&client_id, response).await.unwrap();
                    }
                    ServerMessage::ClientDisconnected { .. } => {}
                }
            }
        });

        let mut client = IpcClient::connect(&socket_path)
            .await
            .unwrap()
            .with_caller(AccountId::new("alice"));
        let response = client.send(Command::Ping).await.unwrap();
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));

        // Same process, same uid
        let info = seen_rx.recv().await.unwrap();
        assert_eq!(info.role, ClientRole::Admin);
        assert_eq!(server.client_count().await, 1);
    }

    #[tokio::test]
    async fn malformed_line_gets_error_response() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("escrow.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let response: Response = serde_json::from_str(line.trim()).unwrap();
        match response.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::InvalidRequest),
            ResponseResult::Ok(_) => panic!("Expected error response"),
        }
    }
}
