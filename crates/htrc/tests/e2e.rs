//! End-to-end tests: a real agent forwarding through a real relay into a
//! real local origin.

use axum::routing::{get, post};
use htrc::config::AgentConfig;
use htrc::{ConnStatus, Tunnel, TunnelEvent};
use htrs::config::RelayConfig;
use htrs::server::RelayState;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TEST_SECRET: &str = "sk_test_key_123";
const TEST_DOMAIN: &str = "tunnel.test.local";

async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    let config = RelayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        secrets: HashSet::from([TEST_SECRET.to_string()]),
        base_domain: TEST_DOMAIN.to_string(),
        max_tunnels: 10,
        heartbeat_interval: 30,
        request_timeout: 5,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = htrs::run(listener, state_clone, std::future::pending()).await {
            eprintln!("relay error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state)
}

/// A small local origin standing in for the private service.
async fn start_origin() -> SocketAddr {
    let app = axum::Router::new()
        .route("/hello", get(|| async { "Hello from local!" }))
        .route(
            "/echo",
            post(|headers: axum::http::HeaderMap, body: String| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("text/plain")
                    .to_owned();
                ([("content-type", content_type)], body)
            }),
        )
        .route(
            "/whoami",
            get(|headers: axum::http::HeaderMap| async move {
                headers
                    .get("host")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_owned()
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

fn agent_config(relay: SocketAddr, origin: SocketAddr, subdomain: Option<&str>) -> AgentConfig {
    AgentConfig {
        relay: format!("ws://{relay}"),
        secret: TEST_SECRET.to_string(),
        local_host: "127.0.0.1".to_string(),
        local_port: origin.port(),
        subdomain: subdomain.map(str::to_owned),
    }
}

#[tokio::test]
async fn hello_round_trips_through_the_agent() {
    let (relay, _state) = start_relay().await;
    let origin = start_origin().await;

    let tunnel = Tunnel::connect(agent_config(relay, origin, None)).await.unwrap();
    assert_eq!(tunnel.subdomain().len(), 8);
    assert_eq!(
        tunnel.url(),
        format!("https://{}.{TEST_DOMAIN}", tunnel.subdomain())
    );
    let mut events = tunnel.events();

    let response = reqwest::Client::new()
        .get(format!("http://{relay}/hello"))
        .header("host", format!("{}.{TEST_DOMAIN}", tunnel.subdomain()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Hello from local!");

    match events.recv().await.unwrap() {
        TunnelEvent::Request {
            method,
            path,
            status,
        } => {
            assert_eq!(method, "GET");
            assert_eq!(path, "/hello");
            assert_eq!(status, 200);
        }
        other => panic!("expected request event, got {other:?}"),
    }
}

#[tokio::test]
async fn preferred_label_round_trips_a_posted_body() {
    let (relay, _state) = start_relay().await;
    let origin = start_origin().await;

    let tunnel = Tunnel::connect(agent_config(relay, origin, Some("posttest")))
        .await
        .unwrap();
    assert_eq!(tunnel.url(), format!("https://posttest.{TEST_DOMAIN}"));

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/echo"))
        .header("host", format!("posttest.{TEST_DOMAIN}"))
        .header("content-type", "application/json")
        .body(r#"{"hello":"world"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), r#"{"hello":"world"}"#);
}

#[tokio::test]
async fn host_header_is_rewritten_for_the_origin() {
    let (relay, _state) = start_relay().await;
    let origin = start_origin().await;

    let _tunnel = Tunnel::connect(agent_config(relay, origin, Some("hosttest")))
        .await
        .unwrap();

    let seen_host = reqwest::Client::new()
        .get(format!("http://{relay}/whoami"))
        .header("host", format!("hosttest.{TEST_DOMAIN}"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(seen_host, format!("127.0.0.1:{}", origin.port()));
}

#[tokio::test]
async fn dead_origin_yields_502() {
    let (relay, _state) = start_relay().await;

    // Bind then drop to get a port with nothing listening.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let _tunnel = Tunnel::connect(agent_config(relay, dead_addr, Some("deadport")))
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .get(format!("http://{relay}/"))
        .header("host", format!("deadport.{TEST_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn wrong_secret_fails_at_connect_time() {
    let (relay, state) = start_relay().await;
    let origin = start_origin().await;

    let mut config = agent_config(relay, origin, None);
    config.secret = "wrong_key".to_string();

    assert!(Tunnel::connect(config).await.is_err());
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn close_is_idempotent_and_terminal() {
    let (relay, state) = start_relay().await;
    let origin = start_origin().await;

    let tunnel = Tunnel::connect(agent_config(relay, origin, Some("closing")))
        .await
        .unwrap();
    let mut events = tunnel.events();
    let mut status = tunnel.status();

    tunnel.close();
    tunnel.close();
    assert!(tunnel.is_closed());

    match tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap()
    {
        TunnelEvent::Closed => {}
        other => panic!("expected closed event, got {other:?}"),
    }
    // No second closed event follows.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), events.recv())
            .await
            .is_err()
    );

    status.wait_for(|s| *s == ConnStatus::Disconnected).await.unwrap();

    // The relay forgets the subdomain once the channel is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.registry.is_empty());

    let response = reqwest::Client::new()
        .get(format!("http://{relay}/"))
        .header("host", format!("closing.{TEST_DOMAIN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn concurrent_requests_are_served_independently() {
    let (relay, _state) = start_relay().await;
    let origin = start_origin().await;

    let _tunnel = Tunnel::connect(agent_config(relay, origin, Some("parallel")))
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let response = client
                .post(format!("http://{relay}/echo"))
                .header("host", format!("parallel.{TEST_DOMAIN}"))
                .body(format!("payload-{i}"))
                .send()
                .await
                .unwrap();
            (i, response.text().await.unwrap())
        }));
    }

    for handle in handles {
        let (i, body) = handle.await.unwrap();
        assert_eq!(body, format!("payload-{i}"));
    }
}
