//! Persistent outbound connection to the log aggregator.
//!
//! # Responsibilities
//! - Dial the aggregator once at startup, bounded by a dial timeout
//! - Serialize concurrent writers onto one ordered byte stream
//! - Detect a dropped transport and refuse further writes
//! - Bound every write so a stalled aggregator cannot block callers
//! - Flush and release the transport on close
//!
//! # Design Decisions
//! - No reconnect: once the transport drops, writes fail until shutdown
//! - Records are encoded before taking the transport lock
//! - `tokio::sync::Mutex` is FIFO, so per-producer order is preserved
//! - A write that times out or is cancelled mid-record drops the transport,
//!   so a partial line is never followed by another record

use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::config::LogSinkConfig;
use crate::observability::metrics::{MetricSample, MetricsSink, LOG_SHIP_FAILURES_TOTAL};
use crate::shipping::record::{FieldValue, LogRecord};

/// Lifecycle of the sink's transport.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Failure to establish the transport.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("timed out after {timeout:?} connecting to {address}")]
    Timeout { address: String, timeout: Duration },

    #[error("failed to connect to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Failure to ship one record.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("log sink is not connected (state: {state:?})")]
    NotConnected { state: ConnectionState },

    #[error("log aggregator closed the connection")]
    PeerClosed,

    #[error("timed out after {timeout:?} shipping log record")]
    Timeout { timeout: Duration },

    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write log record: {0}")]
    Io(#[from] io::Error),
}

/// Counters describing the sink's activity so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    pub records_written: u64,
    pub write_failures: u64,
}

/// Line-delimited JSON log shipper over a single TCP connection.
#[derive(Debug)]
pub struct LogSink {
    address: String,
    write_timeout: Duration,
    state: AtomicU8,
    transport: Mutex<Option<TcpStream>>,
    static_fields: Vec<(String, FieldValue)>,
    records_written: AtomicU64,
    write_failures: AtomicU64,
}

impl LogSink {
    /// Dial the aggregator. Fails if no connection is established within
    /// `config.dial_timeout`.
    pub async fn open(config: &LogSinkConfig) -> Result<Self, ConnectError> {
        let mut sink = Self {
            address: config.address.clone(),
            write_timeout: config.write_timeout,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            transport: Mutex::new(None),
            static_fields: config
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from(v.as_str())))
                .collect(),
            records_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        };

        sink.set_state(ConnectionState::Connecting);
        let dial =
            time::timeout(config.dial_timeout, TcpStream::connect(&config.address)).await;
        let stream = match dial {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                sink.set_state(ConnectionState::Disconnected);
                return Err(ConnectError::Io {
                    address: config.address.clone(),
                    source,
                });
            }
            Err(_) => {
                sink.set_state(ConnectionState::Disconnected);
                return Err(ConnectError::Timeout {
                    address: config.address.clone(),
                    timeout: config.dial_timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle on log sink socket");
        }
        *sink.transport.get_mut() = Some(stream);
        sink.set_state(ConnectionState::Connected);

        tracing::info!(address = %sink.address, "Connected to log aggregator");
        Ok(sink)
    }

    /// Ship one record. Fails unless the transport is `Connected`.
    ///
    /// Waiting for the transport and writing share one `write_timeout`.
    pub async fn write(&self, record: &LogRecord) -> Result<(), WriteError> {
        let line = match record.encode_line(&self.static_fields) {
            Ok(line) => line,
            Err(e) => return Err(self.failed(e.into())),
        };

        let until = Instant::now() + self.write_timeout;
        let timed_out = WriteError::Timeout {
            timeout: self.write_timeout,
        };
        let Ok(mut transport) = time::timeout_at(until, self.transport.lock()).await else {
            return Err(self.failed(timed_out));
        };
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(self.failed(WriteError::NotConnected { state }));
        }
        let Some(stream) = transport.as_mut() else {
            return Err(self.failed(WriteError::NotConnected { state }));
        };

        if peer_closed(stream) {
            self.drop_transport(&mut transport, "peer closed the connection");
            return Err(self.failed(WriteError::PeerClosed));
        }

        let mut frame = PendingFrame {
            sink: self,
            transport: &mut *transport,
            complete: false,
        };
        let Some(stream) = frame.transport.as_mut() else {
            return Err(self.failed(WriteError::NotConnected { state }));
        };
        match time::timeout_at(until, stream.write_all(&line)).await {
            Ok(Ok(())) => frame.complete = true,
            Ok(Err(e)) => return Err(self.failed(e.into())),
            Err(_) => return Err(self.failed(timed_out)),
        }
        drop(frame);

        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Flush and release the transport. A second call is a no-op.
    pub async fn close(&self) -> io::Result<()> {
        let mut transport = self.transport.lock().await;
        if matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed) {
            return Ok(());
        }
        self.set_state(ConnectionState::Closing);

        let result = match transport.take() {
            Some(mut stream) => {
                let flushed = stream.flush().await;
                let shut = stream.shutdown().await;
                flushed.and(shut)
            }
            None => Ok(()),
        };
        self.set_state(ConnectionState::Closed);

        let stats = self.stats();
        tracing::info!(
            address = %self.address,
            records_written = stats.records_written,
            write_failures = stats.write_failures,
            "Log sink closed"
        );
        result
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn failed(&self, error: WriteError) -> WriteError {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        error
    }

    fn drop_transport(&self, transport: &mut Option<TcpStream>, reason: &'static str) {
        transport.take();
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(address = %self.address, reason, "Log sink transport dropped");
    }
}

/// A record on its way onto the wire.
///
/// Dropped before `complete` is set, it tears the transport down: the stream
/// may end in a partial line.
struct PendingFrame<'a> {
    sink: &'a LogSink,
    transport: &'a mut Option<TcpStream>,
    complete: bool,
}

impl Drop for PendingFrame<'_> {
    fn drop(&mut self) {
        if !self.complete {
            self.sink.drop_transport(&mut *self.transport, "record write interrupted");
        }
    }
}

/// Non-blocking probe for a peer that already hung up.
///
/// The aggregator never sends data, so any readable EOF means the connection
/// is gone. Stray bytes are discarded.
fn peer_closed(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 256];
    loop {
        match stream.try_read(&mut probe) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(_) => return true,
        }
    }
}

/// Ship `record`, or fall back to the local log when the sink refuses it.
///
/// Never fails: the caller's response does not depend on log shipping.
pub async fn ship_or_fallback(sink: &LogSink, metrics: &dyn MetricsSink, record: &LogRecord) {
    if let Err(e) = sink.write(record).await {
        metrics.record(&MetricSample::counter(LOG_SHIP_FAILURES_TOTAL));
        let fields = record
            .fields()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::warn!(
            error = %e,
            level = %record.level(),
            fields = %fields,
            "{}",
            record.message()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn config_for(address: String) -> LogSinkConfig {
        LogSinkConfig {
            address,
            dial_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            fields: BTreeMap::from([("environment".to_string(), "test".to_string())]),
        }
    }

    async fn read_lines(stream: TcpStream) -> Vec<serde_json::Value> {
        let mut lines = BufReader::new(stream).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn open_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = LogSink::open(&config_for(addr.to_string())).await.unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }), "{err}");
    }

    #[tokio::test]
    async fn single_producer_order_is_preserved() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = LogSink::open(&config_for(addr.to_string())).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let reader = tokio::spawn(read_lines(peer));

        for seq in 0..50u64 {
            sink.write(&LogRecord::info("tick").with("seq", seq)).await.unwrap();
        }
        sink.close().await.unwrap();

        let lines = reader.await.unwrap();
        let seqs: Vec<u64> = lines.iter().map(|l| l["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        assert!(lines.iter().all(|l| l["environment"] == "test"));
        assert_eq!(sink.stats().records_written, 50);
    }

    #[tokio::test]
    async fn concurrent_producers_keep_their_own_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = Arc::new(LogSink::open(&config_for(addr.to_string())).await.unwrap());
        let (peer, _) = listener.accept().await.unwrap();
        let reader = tokio::spawn(read_lines(peer));

        let mut producers = Vec::new();
        for producer in 0..4u64 {
            let sink = sink.clone();
            producers.push(tokio::spawn(async move {
                for seq in 0..25u64 {
                    let record = LogRecord::info("work")
                        .with("producer", producer)
                        .with("seq", seq);
                    sink.write(&record).await.unwrap();
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        sink.close().await.unwrap();

        let lines = reader.await.unwrap();
        assert_eq!(lines.len(), 100);
        for producer in 0..4u64 {
            let seqs: Vec<u64> = lines
                .iter()
                .filter(|l| l["producer"].as_u64() == Some(producer))
                .map(|l| l["seq"].as_u64().unwrap())
                .collect();
            assert_eq!(seqs, (0..25).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = LogSink::open(&config_for(addr.to_string())).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let reader = tokio::spawn(read_lines(peer));

        sink.write(&LogRecord::info("only")).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(sink.state(), ConnectionState::Closed);

        sink.close().await.unwrap();
        assert_eq!(sink.state(), ConnectionState::Closed);

        let err = sink.write(&LogRecord::info("late")).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::NotConnected { state: ConnectionState::Closed }
        ));

        let lines = reader.await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["msg"], "only");
    }

    #[tokio::test]
    async fn write_fails_after_peer_hangs_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = LogSink::open(&config_for(addr.to_string())).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = sink.write(&LogRecord::error("lost")).await.unwrap_err();
        assert!(matches!(err, WriteError::PeerClosed), "{err}");
        assert_eq!(sink.state(), ConnectionState::Disconnected);

        let err = sink.write(&LogRecord::error("lost again")).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::NotConnected { state: ConnectionState::Disconnected }
        ));
        assert_eq!(sink.stats().write_failures, 2);

        // Closing a dropped sink still succeeds.
        sink.close().await.unwrap();
        assert_eq!(sink.state(), ConnectionState::Closed);
    }

    /// One record larger than any socket buffer, so `write_all` stalls
    /// against a peer that never reads.
    fn oversized_record() -> LogRecord {
        LogRecord::info("bulk").with("payload", "x".repeat(32 * 1024 * 1024))
    }

    #[tokio::test]
    async fn write_times_out_when_aggregator_stops_reading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = config_for(addr.to_string());
        config.write_timeout = Duration::from_millis(200);
        let sink = LogSink::open(&config).await.unwrap();
        let (_stalled_peer, _) = listener.accept().await.unwrap();

        let started = std::time::Instant::now();
        let err = sink.write(&oversized_record()).await.unwrap_err();
        assert!(matches!(err, WriteError::Timeout { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.state(), ConnectionState::Disconnected);

        // The half-written line is never continued.
        let err = sink.write(&LogRecord::info("after")).await.unwrap_err();
        assert!(matches!(err, WriteError::NotConnected { .. }), "{err}");
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_write_drops_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = config_for(addr.to_string());
        config.write_timeout = Duration::from_secs(30);
        let sink = LogSink::open(&config).await.unwrap();
        let (_stalled_peer, _) = listener.accept().await.unwrap();

        // Long enough to get past encoding and block in `write_all`.
        let abandoned =
            tokio::time::timeout(Duration::from_secs(2), sink.write(&oversized_record())).await;
        assert!(abandoned.is_err());
        assert_eq!(sink.state(), ConnectionState::Disconnected);

        let err = sink.write(&LogRecord::info("after")).await.unwrap_err();
        assert!(matches!(err, WriteError::NotConnected { .. }), "{err}");
    }
}
