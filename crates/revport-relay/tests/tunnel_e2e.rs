//! End-to-end tunnel tests: a real relay, a real client, and a real
//! local service, all on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use revport_client::{TunnelClient, TunnelOptions};
use revport_proto::Protocol;
use revport_relay::{Relay, RelayConfig};

async fn start_relay(config: RelayConfig) -> (Arc<Relay>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Relay::new(config);
    tokio::spawn(relay.clone().serve(listener));
    (relay, addr)
}

fn start_client(relay_addr: SocketAddr, opts: impl FnOnce(&mut TunnelOptions)) -> Arc<TunnelClient> {
    let mut options = TunnelOptions {
        server: Url::parse(&format!("http://{relay_addr}")).unwrap(),
        local_addr: String::new(),
        protocol: Protocol::Http,
        subdomain: None,
        remote_port: None,
        extra_data: None,
    };
    opts(&mut options);
    let client = Arc::new(TunnelClient::new(options));
    let runner = client.clone();
    tokio::spawn(async move { runner.run().await });
    client
}

async fn wait_for_remote_addr(client: &TunnelClient) -> String {
    let mut rx = client.remote_address();
    let addr = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|a| a.is_some()))
        .await
        .expect("tunnel not provisioned in time")
        .unwrap()
        .clone()
        .unwrap();
    addr
}

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut conn, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_tcp_tunnel_end_to_end() {
    let echo_addr = start_echo_server().await;

    let (relay, relay_addr) = start_relay(RelayConfig {
        domain: "127.0.0.1".to_string(),
        port_range: 42100..42110,
        ..RelayConfig::default()
    })
    .await;

    let client = start_client(relay_addr, |o| {
        o.protocol = Protocol::Tcp;
        o.local_addr = echo_addr.to_string();
    });

    let public_addr = wait_for_remote_addr(&client).await;
    assert_eq!(public_addr, "127.0.0.1:42100");

    let mut conn = TcpStream::connect(&public_addr).await.unwrap();
    conn.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    drop(conn);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let (to_public, to_client) = relay.stats().snapshot();
    assert_eq!(to_public, 4);
    assert_eq!(to_client, 4);
}

#[tokio::test]
async fn test_tcp_tunnel_concurrent_connections() {
    let echo_addr = start_echo_server().await;

    let (_relay, relay_addr) = start_relay(RelayConfig {
        domain: "127.0.0.1".to_string(),
        port_range: 42120..42130,
        ..RelayConfig::default()
    })
    .await;

    let client = start_client(relay_addr, |o| {
        o.protocol = Protocol::Tcp;
        o.local_addr = echo_addr.to_string();
    });
    let public_addr = wait_for_remote_addr(&client).await;

    let mut tasks = Vec::new();
    for i in 0..5u8 {
        let addr = public_addr.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(&addr).await.unwrap();
            let payload = [i; 16];
            conn.write_all(&payload).await.unwrap();
            let mut buf = [0u8; 16];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_tcp_hook_receives_client_peer_address() {
    use std::os::unix::fs::PermissionsExt;

    let echo_addr = start_echo_server().await;

    let hooks_dir = std::env::temp_dir().join("revport-e2e-hook-env");
    std::fs::create_dir_all(&hooks_dir).unwrap();
    let out_path = hooks_dir.join("env.out");
    let script = hooks_dir.join("tcp-post-connect");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$PORT|$REMOTE_ADDR|$CLIENT_ADDRESS\" > {}\n",
            out_path.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let (_relay, relay_addr) = start_relay(RelayConfig {
        domain: "127.0.0.1".to_string(),
        port_range: 42140..42150,
        hooks_dir,
    })
    .await;

    let client = start_client(relay_addr, |o| {
        o.protocol = Protocol::Tcp;
        o.local_addr = echo_addr.to_string();
    });
    wait_for_remote_addr(&client).await;

    let out = std::fs::read_to_string(&out_path).unwrap();
    let parts: Vec<&str> = out.trim().split('|').collect();
    assert_eq!(parts[0], "42140");
    // Both address variables carry the tunnel client's peer address.
    assert_eq!(parts[1], parts[2]);
    assert!(parts[1].starts_with("127.0.0.1:"), "got: {}", parts[1]);
}

#[tokio::test]
async fn test_http_tunnel_end_to_end() {
    // Local HTTP service to expose.
    let app = axum::Router::new().route(
        "/hello",
        axum::routing::get(|| async { "hi from local" }),
    );
    let local_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_addr = local_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(local_listener, app).await.unwrap();
    });

    let (_relay, relay_addr) = start_relay(RelayConfig {
        domain: "tunnel.test".to_string(),
        port_range: 42130..42140,
        ..RelayConfig::default()
    })
    .await;

    let client = start_client(relay_addr, |o| {
        o.protocol = Protocol::Http;
        o.subdomain = Some("echo".to_string());
        o.local_addr = local_addr.to_string();
    });

    let public_addr = wait_for_remote_addr(&client).await;
    assert_eq!(public_addr, "echo.tunnel.test");

    // The Host header carries the routing decision, so a raw request to
    // the relay's socket stands in for wildcard DNS.
    let mut conn = TcpStream::connect(relay_addr).await.unwrap();
    conn.write_all(
        b"GET /hello HTTP/1.1\r\nHost: echo.tunnel.test\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = String::new();
    conn.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("hi from local"), "got: {response}");
}

#[tokio::test]
async fn test_unknown_host_falls_through_to_status_page() {
    let (_relay, relay_addr) = start_relay(RelayConfig {
        domain: "tunnel.test".to_string(),
        ..RelayConfig::default()
    })
    .await;

    let mut conn = TcpStream::connect(relay_addr).await.unwrap();
    conn.write_all(b"GET / HTTP/1.1\r\nHost: nosuch.tunnel.test\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    conn.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("revport relay"), "got: {response}");
}
