mod common;
use common::*;

#[tokio::test]
async fn debug_conn2() {
    let (addr, _state) = start_relay().await;
    let client = public_client();
    let resp = client.get(format!("http://{addr}/health")).header("host", TEST_DOMAIN).send().await;
    eprintln!("{resp:?}");
    resp.unwrap();
}
