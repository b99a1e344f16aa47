//! Scripted local WebSocket server standing in for the exchange stream

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Closed or open 1m kline for BTCUSDT opening at `open_time`
pub fn kline(open_time: i64, closed: bool) -> String {
    format!(
        r#"{{"e":"kline","E":{},"s":"BTCUSDT","k":{{"t":{},"T":{},"i":"1m","o":"42000","c":"42010","h":"42020","l":"41990","v":"1.5","n":7,"x":{},"q":"63000","V":"0.7","Q":"29400"}}}}"#,
        open_time + 59_999,
        open_time,
        open_time + 59_999,
        closed
    )
}

pub fn combined(stream: &str, payload: &str) -> String {
    format!(r#"{{"stream":"{}","data":{}}}"#, stream, payload)
}

pub const T0: i64 = 1_717_200_000_000;
pub const MINUTE: i64 = 60_000;

/// Serve one connection per script entry. Each connection waits for the
/// client's first request, sends the scripted frames, then closes, except the
/// last one which stays open until the client leaves. Resolves to every
/// control request received.
pub async fn serve(script: Vec<Vec<String>>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        let connections = script.len();
        for (n, frames) in script.into_iter().enumerate() {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    requests.push(text);
                    break;
                }
            }
            for frame in frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }

            if n + 1 < connections {
                let _ = ws.close(None).await;
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    requests.push(text);
                }
            }
        }
        requests
    });

    (url, handle)
}
