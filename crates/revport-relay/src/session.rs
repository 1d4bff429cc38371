//! Control session lifecycle.
//!
//! One control WebSocket per tunnel. The session provisions the
//! requested public resource, announces its address back to the client,
//! then sits in a read loop until either side disconnects. Everything
//! the session registered is torn down when the handler returns.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use revport_proto::{ControlMessage, Protocol, TunnelRequest};

use crate::error::RelayError;
use crate::hooks;
use crate::relay::Relay;
use crate::router::TunnelHandle;
use crate::tcp;

pub(crate) async fn control_ws(
    State(relay): State<Arc<Relay>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(request): Query<TunnelRequest>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(relay, socket, peer, request))
}

/// Undoes everything the session registered, regardless of how the
/// handler exits.
struct SessionGuard {
    relay: Arc<Relay>,
    session: String,
    accept_task: Option<JoinHandle<()>>,
    route: Option<String>,
    generated_name: Option<String>,
}

impl SessionGuard {
    fn new(relay: Arc<Relay>, session: String) -> Self {
        Self {
            relay,
            session,
            accept_task: None,
            route: None,
            generated_name: None,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        if let Some(route) = self.route.take() {
            self.relay.routes.remove(&route, &self.session);
        }
        if let Some(name) = self.generated_name.take() {
            self.relay.names.release(&name);
        }
        self.relay.registry.cancel_session(&self.session);
    }
}

async fn run_session(
    relay: Arc<Relay>,
    socket: WebSocket,
    peer: SocketAddr,
    request: TunnelRequest,
) {
    let session = Uuid::new_v4().to_string();
    info!(
        "control session {} from {} ({} tunnel)",
        session, peer, request.protocol
    );

    let (sink, stream) = socket.split();
    let (control_tx, control_rx) = mpsc::channel::<ControlMessage>(32);
    let writer = tokio::spawn(write_loop(sink, control_rx));

    let handle = TunnelHandle::new(session.clone(), control_tx.clone());
    let mut guard = SessionGuard::new(relay.clone(), session.clone());

    match provision(&relay, &handle, peer, &request, &mut guard).await {
        Ok(public_addr) => {
            info!("session {} serving at {}", session, public_addr);
            let _ = control_tx
                .send(ControlMessage::RemoteAddress { body: public_addr })
                .await;
            read_loop(stream, &session).await;
        }
        Err(err) => {
            warn!("session {} provisioning failed: {}", session, err);
            let _ = control_tx
                .send(ControlMessage::Message {
                    body: err.to_string(),
                })
                .await;
        }
    }

    info!("control session {} closed", session);
    drop(handle);
    drop(control_tx);
    drop(guard);
    let _ = writer.await;
}

/// Binds the public resource for the request and returns the address
/// announced to the client.
async fn provision(
    relay: &Arc<Relay>,
    handle: &TunnelHandle,
    peer: SocketAddr,
    request: &TunnelRequest,
    guard: &mut SessionGuard,
) -> Result<String, RelayError> {
    let domain = &relay.config().domain;
    match request.protocol {
        Protocol::Tcp => {
            let (port, listener) = match request.port {
                None | Some(0) => relay.allocator.allocate().await?,
                Some(port) => {
                    let listener = TcpListener::bind(("0.0.0.0", port))
                        .await
                        .map_err(|source| RelayError::PortUnavailable { port, source })?;
                    (port, listener)
                }
            };
            hooks::run(
                &relay.config().hooks_dir,
                hooks::TCP_POST_CONNECT,
                &[
                    ("PORT", port.to_string()),
                    ("REMOTE_ADDR", peer.to_string()),
                    ("CLIENT_ADDRESS", peer.to_string()),
                    ("REMOTE_DATA", request.data.clone().unwrap_or_default()),
                ],
            )
            .await?;
            guard.accept_task = Some(tokio::spawn(tcp::accept_loop(
                relay.clone(),
                listener,
                handle.clone(),
            )));
            Ok(format!("{domain}:{port}"))
        }
        Protocol::Http | Protocol::Https => {
            let subdomain = match request.subdomain.as_deref().filter(|s| !s.is_empty()) {
                Some(name) => name.to_string(),
                None => {
                    let name = relay.names.generate();
                    guard.generated_name = Some(name.clone());
                    name
                }
            };
            let hostname = format!("{subdomain}.{domain}");
            relay.routes.insert(hostname.clone(), handle.clone())?;
            guard.route = Some(hostname.clone());
            // Subdomain hooks are advisory, a failure does not kill the
            // tunnel.
            if let Err(err) = hooks::run(
                &relay.config().hooks_dir,
                hooks::CREATE_HTTP_SUBDOMAIN,
                &[
                    ("SUBDOMAIN", hostname.clone()),
                    ("CLIENT_ADDRESS", peer.to_string()),
                    ("REMOTE_DATA", request.data.clone().unwrap_or_default()),
                ],
            )
            .await
            {
                warn!("subdomain hook failed: {}", err);
            }
            Ok(hostname)
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut control_rx: mpsc::Receiver<ControlMessage>,
) {
    while let Some(msg) = control_rx.recv().await {
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to encode control message: {}", err);
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, session: &str) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match ControlMessage::from_json(text.as_str()) {
                Ok(ControlMessage::Idle) => {}
                Ok(msg) => debug!("session {} sent {:?}", session, msg),
                Err(err) => warn!("session {} sent bad control frame: {}", session, err),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}
