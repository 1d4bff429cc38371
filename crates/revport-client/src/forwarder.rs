//! Bridges reverse streams to the local service.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use revport_pipe::{pipe, PipeStats};
use revport_proto::Protocol;

use crate::error::SessionError;
use crate::session::ClientStream;

/// Consumes reverse streams from the queue for the lifetime of one
/// control session.
pub(crate) async fn run(
    protocol: Protocol,
    local_addr: String,
    mut queue: mpsc::Receiver<ClientStream>,
    stats: Arc<PipeStats>,
) -> Result<(), SessionError> {
    while let Some(reverse) = queue.recv().await {
        match protocol {
            Protocol::Tcp => {
                // A dead local service is fatal for TCP tunnels. The
                // session restarts and retries with backoff.
                let local = TcpStream::connect(&local_addr).await.map_err(|source| {
                    SessionError::LocalService {
                        addr: local_addr.clone(),
                        source,
                    }
                })?;
                let _ = local.set_nodelay(true);
                let stats = stats.clone();
                tokio::spawn(async move {
                    let (sent, received) = pipe::join(local, reverse, &stats).await;
                    debug!("tcp stream done, {} bytes sent, {} received", sent, received);
                });
            }
            Protocol::Http | Protocol::Https => {
                let local_addr = local_addr.clone();
                tokio::spawn(serve_http(reverse, local_addr));
            }
        }
    }
    Ok(())
}

/// Serves HTTP on one reverse stream, proxying each request to the
/// local service.
async fn serve_http(reverse: ClientStream, local_addr: String) {
    let service = service_fn(move |req: Request<Incoming>| {
        let local_addr = local_addr.clone();
        async move { proxy_request(req, &local_addr).await }
    });
    if let Err(err) = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(reverse), service)
        .await
    {
        debug!("reverse http connection ended: {}", err);
    }
}

async fn proxy_request(
    mut req: Request<Incoming>,
    local_addr: &str,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let local = match TcpStream::connect(local_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("local service {} unreachable: {}", local_addr, err);
            return Ok(bad_gateway());
        }
    };
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(local)).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("local connection ended: {}", err);
        }
    });
    // The local service sees itself as the host.
    if let Ok(value) = local_addr.parse() {
        req.headers_mut().insert(hyper::header::HOST, value);
    }
    let resp = sender.send_request(req).await?;
    Ok(resp.map(|body| body.boxed()))
}

fn bad_gateway() -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = Full::new(Bytes::from_static(b"local service unavailable"))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}
