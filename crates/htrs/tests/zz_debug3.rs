use std::collections::HashSet;
use std::sync::Arc;
use htrs::config::RelayConfig;
use htrs::server::RelayState;
use tokio::sync::oneshot;

#[tokio::test]
async fn debug_conn3() {
    let config = RelayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        secrets: HashSet::from(["sk_test".to_string()]),
        base_domain: "test.local".to_string(),
        max_tunnels: 10,
        heartbeat_interval: 30,
        request_timeout: 30,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::new(config));
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let state_clone = state.clone();
    tokio::spawn(async move {
        let signal = async move {
            let _ = signal_rx.await;
        };
        if let Err(e) = htrs::run(listener, state_clone, signal).await {
            eprintln!("relay error: {e}");
        }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let resp = reqwest::Client::new().get(format!("http://{addr}/health")).header("host","test.local").send().await;
    eprintln!("{resp:?}");
    resp.unwrap();
    drop(signal_tx);
}
