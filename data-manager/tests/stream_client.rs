//! Stream client against a local WebSocket server: closed-kline filtering,
//! malformed frame handling, reconnect and resubscribe.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use common::{combined, kline, serve, MINUTE, T0};
use data_manager::config::StreamSettings;
use data_manager::stream::{ConnectionState, EventKind, StreamClient, StreamEvent};
use trading_common::data::{Candle, Timeframe};

fn fast_settings() -> StreamSettings {
    StreamSettings {
        reconnect_floor_secs: 0.01,
        reconnect_ceiling_secs: 0.05,
        ping_interval_secs: 0,
        ..Default::default()
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_reconnects_and_resubscribes() {
    let first = vec![
        r#"{"result":null,"id":1}"#.to_string(),
        kline(T0, false),
        kline(T0, true),
        "not json".to_string(),
        r#"{"e":"kline","E":1717200059999,"s":"BTCUSDT"}"#.to_string(),
        combined("btcusdt@kline_1m", &kline(T0 + MINUTE, true)),
    ];
    let second = vec![kline(T0 + 2 * MINUTE, true)];
    let (url, server) = serve(vec![first, second]).await;

    let client = StreamClient::new(url, &fast_settings());
    let seen: Arc<Mutex<Vec<Candle>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on(EventKind::Kline, move |event| {
        if let StreamEvent::Kline(candle) = event {
            sink.lock().push(candle.clone());
        }
    });
    client
        .subscribe_klines("BTC/USDT", &[Timeframe::OneMinute])
        .await
        .unwrap();

    let (shutdown, rx) = broadcast::channel(1);
    let runner = client.clone();
    let task = tokio::spawn(async move { runner.run(rx).await });

    wait_for(|| seen.lock().len() >= 3).await;
    shutdown.send(()).unwrap();
    task.await.unwrap().unwrap();

    let seen = seen.lock();
    let opens: Vec<i64> = seen.iter().map(Candle::timestamp_millis).collect();
    assert_eq!(opens, vec![T0, T0 + MINUTE, T0 + 2 * MINUTE]);
    assert!(seen.iter().all(|c| c.symbol == "BTC/USDT" && c.exchange == "binance"));

    let stats = client.stats();
    assert_eq!(stats.closed_klines, 3);
    assert_eq!(stats.malformed_dropped, 2);
    assert!(stats.reconnects >= 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let requests = server.await.unwrap();
    let subscribes: Vec<&String> = requests.iter().filter(|r| r.contains("SUBSCRIBE")).collect();
    assert_eq!(subscribes.len(), 2);
    assert!(subscribes.iter().all(|r| r.contains("btcusdt@kline_1m")));
}

#[tokio::test]
async fn test_subscribe_while_connected_is_sent_immediately() {
    let (url, server) = serve(vec![vec![r#"{"result":null,"id":1}"#.to_string()]]).await;
    let client = StreamClient::new(url, &fast_settings());
    client
        .subscribe_klines("BTC/USDT", &[Timeframe::OneMinute])
        .await
        .unwrap();

    let (shutdown, rx) = broadcast::channel(1);
    let runner = client.clone();
    let task = tokio::spawn(async move { runner.run(rx).await });

    wait_for(|| client.state() == ConnectionState::Connected).await;
    client.subscribe_ticker("ETH/USDT").await.unwrap();
    // Give the session loop a moment to forward the command
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(()).unwrap();
    task.await.unwrap().unwrap();

    let requests = server.await.unwrap();
    assert!(requests[0].contains("btcusdt@kline_1m"));
    assert!(requests.iter().any(|r| r.contains("ethusdt@ticker")));
    assert_eq!(
        client.subscriptions(),
        vec!["btcusdt@kline_1m".to_string(), "ethusdt@ticker".to_string()]
    );
}
