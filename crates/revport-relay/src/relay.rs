//! Relay server assembly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use revport_pipe::{PipeStats, WsByteStream};
use revport_proto::{CONTROL_PATH, CORRELATION_HEADER, REVERSE_DIAL_PATH};

use crate::config::RelayConfig;
use crate::freeport::PortAllocator;
use crate::names::NamePool;
use crate::proxy;
use crate::registry::Rendezvous;
use crate::router::SubdomainRouter;
use crate::session;
use crate::ReverseStream;

pub struct Relay {
    config: RelayConfig,
    pub(crate) registry: Rendezvous<ReverseStream>,
    pub(crate) routes: SubdomainRouter,
    pub(crate) allocator: PortAllocator,
    pub(crate) names: NamePool,
    stats: Arc<PipeStats>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let allocator = PortAllocator::new(config.port_range.clone());
        Arc::new(Self {
            config,
            registry: Rendezvous::new(),
            routes: SubdomainRouter::new(),
            allocator,
            names: NamePool::new(),
            stats: Arc::new(PipeStats::default()),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Total bytes piped through this relay, both directions.
    pub fn stats(&self) -> &Arc<PipeStats> {
        &self.stats
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", get(status_page))
            .route(CONTROL_PATH, get(session::control_ws))
            .route(REVERSE_DIAL_PATH, get(reverse_dial_ws))
            .layer(middleware::from_fn_with_state(
                self.clone(),
                proxy::forward_subdomains,
            ))
            .with_state(self.clone())
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!("relay listening on {}", listener.local_addr()?);
        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}

async fn status_page(State(relay): State<Arc<Relay>>) -> Html<String> {
    let (to_public, to_client) = relay.stats.snapshot();
    let mut hostnames = relay.routes.hostnames();
    hostnames.sort();
    let routes = if hostnames.is_empty() {
        "<li>none</li>".to_string()
    } else {
        hostnames
            .iter()
            .map(|h| format!("<li>{h}</li>"))
            .collect::<String>()
    };
    Html(format!(
        "<html><head><title>revport</title></head><body>\
         <h1>revport relay</h1>\
         <p>bytes client&rarr;public: {to_public}</p>\
         <p>bytes public&rarr;client: {to_client}</p>\
         <h2>http tunnels</h2><ul>{routes}</ul>\
         </body></html>"
    ))
}

/// Accepts reverse-dialed WebSockets and hands them to whichever
/// request is waiting on the correlation key.
async fn reverse_dial_ws(
    State(relay): State<Arc<Relay>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let key = match headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(key) => key.to_string(),
        None => {
            return (StatusCode::BAD_REQUEST, "missing correlation key").into_response();
        }
    };
    ws.on_upgrade(move |socket| async move {
        let stream = WsByteStream::new(socket);
        if !relay.registry.resolve(&key, Some(stream)) {
            warn!("reverse dial for unknown or expired key {}", key);
        }
    })
}
