//! Structured log output of failure paths
//!
//! Failure lines are rendered with the JSON formatter the service uses for
//! `LOG_FORMAT=json`. Each line must carry exactly one `message` key, and the
//! raw record content must stay under its own field.

use async_trait::async_trait;
use cdc_pipeline::{
    AlertSink, BatchWalker, ChangeHandler, ConsumedRecord, DeadLetterNotice, Dispatcher,
    EventRecord, EventType, FailureSignal, LogAlertSink, UpdatePolicy,
};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::MakeWriter;

const TOPIC: &str = "postgrescdc.events.events";

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn json_subscriber(buffer: SharedBuffer) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .json()
        .with_writer(buffer)
        .finish()
}

fn line_with<'a>(lines: &'a [String], text: &str) -> &'a str {
    lines
        .iter()
        .find(|line| line.contains(text))
        .unwrap_or_else(|| panic!("no log line contains {text}: {lines:?}"))
}

struct NoopHandler;

#[async_trait]
impl ChangeHandler for NoopHandler {
    async fn on_create_or_update(&self, _: &EventRecord, _: EventType) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_delete(&self, _: &EventRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_walker_failure_lines_have_single_message_key() {
    let buffer = SharedBuffer::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(buffer.clone()));

    let walker = BatchWalker::new(Dispatcher::new(Arc::new(NoopHandler), UpdatePolicy::Reject));
    let (tx, mut rx) = mpsc::unbounded_channel::<FailureSignal>();
    let records = vec![
        ConsumedRecord::new(TOPIC, 0, 7, "RAW-CONTENT-xyz"),
        ConsumedRecord::new(
            TOPIC,
            0,
            8,
            r#"{"payload":{"op":"u","after":{"id":3,"payload":"p","status":"DONE"},"source":{"table":"events"},"ts_ms":1700000000000}}"#,
        ),
    ];

    let report = walker.process_batch(&records, &tx).await;
    drop(tx);
    assert_eq!(report.failed, vec![0, 1]);
    assert!(rx.recv().await.is_some());

    let lines = buffer.lines();

    let decode_line = line_with(&lines, "Failed to decode CDC record");
    assert_eq!(decode_line.matches("\"message\":").count(), 1);
    assert!(decode_line.contains(r#""message":"Failed to decode CDC record""#));
    assert!(decode_line.contains(r#""record":"RAW-CONTENT-xyz""#));

    let dispatch_line = line_with(&lines, "Failed to process CDC record");
    assert_eq!(dispatch_line.matches("\"message\":").count(), 1);
    assert!(dispatch_line.contains(r#""message":"Failed to process CDC record""#));
    assert!(dispatch_line.contains(r#""ts_ms":"Some(1700000000000)""#));
    assert!(dispatch_line.contains(r#""table":"#));
    assert!(dispatch_line.contains(r#""record":"{\"payload\""#));
}

#[tokio::test]
async fn test_alert_line_keeps_payload_apart_from_message() {
    let buffer = SharedBuffer::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(buffer.clone()));

    let notice = DeadLetterNotice::from_headers(
        "postgrescdc.events.events.DLT",
        0,
        3,
        Vec::<(&str, Option<&[u8]>)>::new(),
        Some(&b"RAW-CONTENT-xyz"[..]),
    );
    LogAlertSink.alert(&notice).await.unwrap();

    let lines = buffer.lines();
    let line = line_with(&lines, "Dead letter received");
    assert_eq!(line.matches("\"message\":").count(), 1);
    assert!(line.contains(r#""message":"Dead letter received""#));
    assert!(line.contains(r#""payload":"Some(\"RAW-CONTENT-xyz\")""#));
}
