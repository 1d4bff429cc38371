//! HTTP proxying onto reverse streams.
//!
//! Runs as middleware in front of the relay's own routes. Requests
//! whose Host header matches a registered subdomain are proxied over a
//! fresh reverse stream; everything else falls through.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use crate::relay::Relay;
use crate::router::TunnelHandle;

pub(crate) async fn forward_subdomains(
    State(relay): State<Arc<Relay>>,
    req: Request,
    next: Next,
) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.to_string());
    if let Some(host) = host {
        if let Some(handle) = relay.routes.lookup(&host) {
            return forward(relay, handle, req).await;
        }
    }
    next.run(req).await
}

async fn forward(relay: Arc<Relay>, handle: TunnelHandle, req: Request) -> Response {
    let reverse = match handle.open_stream(&relay.registry).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("no reverse stream for proxied request: {}", err);
            return bad_gateway("tunnel client unreachable");
        }
    };

    let (mut sender, conn) = match hyper::client::conn::http1::handshake(TokioIo::new(reverse)).await
    {
        Ok(pair) => pair,
        Err(err) => {
            warn!("handshake over reverse stream failed: {}", err);
            return bad_gateway("tunnel handshake failed");
        }
    };
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("reverse connection ended: {}", err);
        }
    });

    match sender.send_request(req).await {
        Ok(resp) => resp.map(Body::new),
        Err(err) => {
            warn!("proxied request failed: {}", err);
            bad_gateway("tunnel request failed")
        }
    }
}

fn bad_gateway(msg: &'static str) -> Response {
    (StatusCode::BAD_GATEWAY, msg).into_response()
}
