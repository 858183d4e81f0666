//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

use observability_demo::config::ServiceConfig;
use observability_demo::http::{AppState, RequestServer};
use observability_demo::{LogSink, MetricsRegistry};

/// A fake log aggregator that collects newline-delimited JSON records.
pub struct LogCollector {
    address: SocketAddr,
    records: Arc<Mutex<Vec<Value>>>,
    closed: watch::Receiver<usize>,
}

impl LogCollector {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let records = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed) = watch::channel(0usize);
        let closed_tx = Arc::new(closed_tx);

        let collected = records.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let collected = collected.clone();
                let closed_tx = closed_tx.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(socket).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            collected.lock().unwrap().push(value);
                        }
                    }
                    closed_tx.send_modify(|n| *n += 1);
                });
            }
        });

        Self {
            address,
            records,
            closed,
        }
    }

    /// An aggregator that accepts and immediately hangs up.
    pub async fn start_hanging_up() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        address
    }

    /// An aggregator that accepts and keeps connections open but never reads.
    pub async fn start_stalled() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        address
    }

    pub fn address(&self) -> String {
        self.address.to_string()
    }

    pub fn records(&self) -> Vec<Value> {
        self.records.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .iter()
            .filter_map(|r| r["msg"].as_str().map(str::to_string))
            .collect()
    }

    /// Wait until a shipping connection has been closed by the sink.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let mut closed = self.closed.clone();
        let was_closed = matches!(
            tokio::time::timeout(timeout, closed.wait_for(|n| *n > 0)).await,
            Ok(Ok(_))
        );
        was_closed
    }

    /// Poll until a record with `msg` arrives.
    pub async fn wait_for_message(&self, msg: &str, timeout: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = self.records().into_iter().find(|r| r["msg"] == msg) {
                return Some(record);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Fast configuration bound to an ephemeral port.
pub fn test_config(log_sink: String) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.log_sink.address = log_sink;
    config.log_sink.dial_timeout = Duration::from_secs(1);
    config.log_sink.write_timeout = Duration::from_millis(500);
    config.emitter.interval = Duration::from_millis(20);
    config.shutdown.deadline = Duration::from_secs(2);
    config.orders.success_latency = Duration::from_millis(10);
    config.orders.failure_latency = Duration::from_millis(50);
    config.jobs.step_latency = Duration::from_millis(5);
    config
}

/// A port that nothing listens on.
pub async fn unused_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    address
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Start a bare `RequestServer` that ships to `log_sink` and always draws `order_id`.
pub async fn start_server(
    config: &ServiceConfig,
    order_id: u32,
) -> (RequestServer, Arc<LogSink>, MetricsRegistry) {
    let metrics = MetricsRegistry::new(&config.observability.namespace).unwrap();
    let sink = Arc::new(LogSink::open(&config.log_sink).await.unwrap());

    let mut state = AppState::new(config, metrics.clone(), sink.clone());
    state.orders = state.orders.with_order_ids(Arc::new(move || order_id));

    let server = RequestServer::listen(&config.listener, state).await.unwrap();
    (server, sink, metrics)
}
