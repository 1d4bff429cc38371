//! Public TCP listener for TCP tunnels.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use revport_pipe::pipe;

use crate::relay::Relay;
use crate::router::TunnelHandle;

pub(crate) async fn accept_loop(relay: Arc<Relay>, listener: TcpListener, handle: TunnelHandle) {
    loop {
        match listener.accept().await {
            Ok((public, peer)) => {
                debug!("public connection from {}", peer);
                tokio::spawn(serve_public_conn(relay.clone(), public, handle.clone()));
            }
            Err(err) => {
                warn!("accept failed on tunnel listener: {}", err);
                break;
            }
        }
    }
}

async fn serve_public_conn(relay: Arc<Relay>, public: TcpStream, handle: TunnelHandle) {
    let reverse = match handle.open_stream(&relay.registry).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!("dropping public connection, no reverse stream: {}", err);
            return;
        }
    };
    let _ = public.set_nodelay(true);
    let (to_public, to_client) = pipe::join(reverse, public, relay.stats()).await;
    debug!(
        "public connection done, {} bytes out, {} bytes in",
        to_public, to_client
    );
}
