//! Control session and reverse dialing.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use revport_pipe::{PipeStats, WsByteStream};
use revport_proto::{
    ControlMessage, Protocol, CONTROL_PATH, CORRELATION_HEADER, KEEPALIVE_INTERVAL,
    REVERSE_DIAL_PATH, REVERSE_QUEUE_CAPACITY,
};

use crate::error::SessionError;
use crate::forwarder;
use crate::reconnect;

/// A reverse-dialed WebSocket to the relay, viewed as a raw byte
/// stream.
pub type ClientStream =
    WsByteStream<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Relay base URL, `http(s)` or `ws(s)` scheme.
    pub server: Url,
    /// Local service to expose, `host:port`.
    pub local_addr: String,
    pub protocol: Protocol,
    /// Requested subdomain for HTTP tunnels. The relay picks one when
    /// empty.
    pub subdomain: Option<String>,
    /// Requested public port for TCP tunnels. The relay picks one when
    /// empty or zero.
    pub remote_port: Option<u16>,
    /// Opaque data handed to relay-side hooks.
    pub extra_data: Option<String>,
}

pub struct TunnelClient {
    opts: TunnelOptions,
    stats: Arc<PipeStats>,
    remote_addr: watch::Sender<Option<String>>,
}

impl TunnelClient {
    pub fn new(opts: TunnelOptions) -> Self {
        let (remote_addr, _) = watch::channel(None);
        Self {
            opts,
            stats: Arc::new(PipeStats::default()),
            remote_addr,
        }
    }

    pub fn stats(&self) -> &Arc<PipeStats> {
        &self.stats
    }

    /// Watch for the public address announced by the relay. Holds
    /// `None` until the tunnel is provisioned.
    pub fn remote_address(&self) -> watch::Receiver<Option<String>> {
        self.remote_addr.subscribe()
    }

    /// Keeps the tunnel alive forever, reconnecting with backoff when a
    /// session ends.
    pub async fn run(&self) {
        let mut attempt: u32 = 0;
        loop {
            let result = self.run_once().await;
            // A session that got as far as provisioning resets the
            // attempt counter.
            let provisioned = self.remote_addr.send_replace(None).is_some();
            if provisioned {
                attempt = 0;
            }
            match &result {
                Ok(()) => info!("relay closed the session, reconnecting"),
                Err(err) => warn!("tunnel session failed: {}", err),
            }
            let class = close_class(&result, provisioned);
            let delay = reconnect::backoff_delay(class, attempt);
            attempt = attempt.saturating_add(1);
            debug!("reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs one full control session. Returns `Ok(())` on a clean
    /// close by the relay.
    pub async fn run_once(&self) -> Result<(), SessionError> {
        let url = self.control_url()?;
        debug!("connecting control channel to {}", url);
        let (socket, _resp) = connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<ControlMessage>(32);
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Idle frames keep middleboxes from reaping the control socket.
        let keepalive_tx = outbox_tx.clone();
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if keepalive_tx.send(ControlMessage::Idle).await.is_err() {
                    break;
                }
            }
        });

        let (queue_tx, queue_rx) = mpsc::channel::<ClientStream>(REVERSE_QUEUE_CAPACITY);
        let mut forwarder = tokio::spawn(forwarder::run(
            self.opts.protocol,
            self.opts.local_addr.clone(),
            queue_rx,
            self.stats.clone(),
        ));

        let dial_url = self.reverse_dial_url()?;
        let result = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.dispatch(text.as_str(), &dial_url, &queue_tx);
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break Err(SessionError::Transport(err.to_string()));
                    }
                },
                joined = &mut forwarder => {
                    break match joined {
                        Ok(Err(err)) => Err(err),
                        Ok(Ok(())) | Err(_) => {
                            Err(SessionError::Transport("forwarder stopped".to_string()))
                        }
                    };
                }
            }
        };

        keepalive.abort();
        forwarder.abort();
        drop(outbox_tx);
        let _ = writer.await;
        result
    }

    fn dispatch(&self, text: &str, dial_url: &Url, queue_tx: &mpsc::Sender<ClientStream>) {
        match ControlMessage::from_json(text) {
            Ok(ControlMessage::NewConnection { key }) => {
                let dial_url = dial_url.clone();
                let queue_tx = queue_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = reverse_dial(dial_url, key, queue_tx).await {
                        warn!("reverse dial failed: {}", err);
                    }
                });
            }
            Ok(ControlMessage::RemoteAddress { body }) => {
                info!("tunnel available at {}", body);
                self.remote_addr.send_replace(Some(body));
            }
            Ok(ControlMessage::Message { body }) => {
                info!("relay: {}", body);
            }
            Ok(ControlMessage::Idle) | Ok(ControlMessage::Unknown) => {}
            Err(err) => warn!("bad control frame from relay: {}", err),
        }
    }

    fn control_url(&self) -> Result<Url, SessionError> {
        let mut url = ws_base(&self.opts.server)?;
        url.set_path(CONTROL_PATH);
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("protocol", self.opts.protocol.as_str());
            if let Some(subdomain) = self.opts.subdomain.as_deref().filter(|s| !s.is_empty()) {
                query.append_pair("subdomain", subdomain);
            }
            if let Some(port) = self.opts.remote_port.filter(|p| *p != 0) {
                query.append_pair("port", &port.to_string());
            }
            if let Some(data) = self.opts.extra_data.as_deref() {
                query.append_pair("data", data);
            }
        }
        Ok(url)
    }

    fn reverse_dial_url(&self) -> Result<Url, SessionError> {
        let mut url = ws_base(&self.opts.server)?;
        url.set_path(REVERSE_DIAL_PATH);
        Ok(url)
    }
}

/// Dial back to the relay with the correlation key and hand the
/// resulting byte stream to the forwarder.
async fn reverse_dial(
    url: Url,
    key: String,
    queue_tx: mpsc::Sender<ClientStream>,
) -> Result<(), SessionError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(SessionError::ServerDial)?;
    let value = HeaderValue::from_str(&key)
        .map_err(|_| SessionError::Transport(format!("unusable correlation key {key}")))?;
    request.headers_mut().insert(CORRELATION_HEADER, value);

    let (socket, _resp) = connect_async(request).await?;
    debug!("reverse stream established for key {}", key);
    queue_tx
        .send(WsByteStream::new(socket))
        .await
        .map_err(|_| SessionError::Transport("forwarder gone".to_string()))
}

/// Failure class for a finished session.
///
/// A clean close on a session that never provisioned means the relay
/// rejected the request (subdomain taken, port unavailable); retrying
/// promptly would hammer a permanent rejection, so it backs off like a
/// dial failure.
fn close_class(result: &Result<(), SessionError>, provisioned: bool) -> crate::ErrorClass {
    match result {
        Ok(()) if provisioned => crate::ErrorClass::Transport,
        Ok(()) => crate::ErrorClass::Dial,
        Err(err) => err.class(),
    }
}

fn ws_base(server: &Url) -> Result<Url, SessionError> {
    let mut url = server.clone();
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SessionError::BadServerUrl(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SessionError::BadServerUrl(server.to_string()))?;
    Ok(url)
}
