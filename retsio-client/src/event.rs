//! Events delivered to the caller of an operation.

use crate::error::ClientError;
use futures::Stream;
use retsio_protocol::{InfoToken, Operation, Record};
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Where a metadata payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    Cache,
    Network,
}

/// A metadata payload and its origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub source: MetadataSource,
    pub payload: Value,
}

/// One event emitted by an operation.
///
/// Every stream ends with exactly one terminal event, [`Event::Finish`] or
/// [`Event::Error`], unless it is cancelled first.
#[derive(Debug)]
pub enum Event {
    /// Login advertised a capability path.
    Capability { operation: Operation, path: String },
    /// Login negotiated a setting.
    Setting(InfoToken),
    /// Record count reported by a search.
    Count(u64),
    /// Header row (arrays format, object mode).
    Header(Vec<String>),
    /// Positional row (arrays format, object mode).
    Row(Vec<String>),
    /// Keyed record (objects format, object mode).
    Record(Record),
    /// A shaped item serialized as one JSON text line.
    Line(String),
    /// A STANDARD-XML search body, normalized.
    Document(Value),
    /// Metadata payload.
    Metadata(Metadata),
    /// The server truncated the result set.
    MaxRows,
    Finish,
    Error(ClientError),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Finish | Event::Error(_))
    }
}

/// Receiving half of an operation.
///
/// Dropping the stream cancels the operation: the producer stops at its
/// next chunk boundary and emits nothing further.
#[derive(Debug)]
pub struct EventStream {
    operation: Operation,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub(crate) fn new(operation: Operation, rx: mpsc::Receiver<Event>) -> Self {
        Self { operation, rx }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Receives the next event, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drains the stream, discarding data events, and returns the outcome.
    pub async fn finish(mut self) -> Result<(), ClientError> {
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Finish => return Ok(()),
                Event::Error(e) => return Err(e),
                _ => {}
            }
        }
        Err(ClientError::StreamClosed)
    }

    /// Collects every data event up to the terminal one.
    pub async fn collect(mut self) -> Result<Vec<Event>, ClientError> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                Event::Finish => return Ok(events),
                Event::Error(e) => return Err(e),
                other => events.push(other),
            }
        }
        Err(ClientError::StreamClosed)
    }

    /// Cancels the operation.
    pub fn close(mut self) {
        self.rx.close();
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn test_finish_ok() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::Count(3)).await.unwrap();
        tx.send(Event::Finish).await.unwrap();
        let stream = EventStream::new(Operation::Search, rx);
        assert!(stream.finish().await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_error() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::Error(ClientError::NotImplemented(Operation::Update)))
            .await
            .unwrap();
        let stream = EventStream::new(Operation::Update, rx);
        assert!(matches!(
            stream.finish().await,
            Err(ClientError::NotImplemented(Operation::Update))
        ));
    }

    #[tokio::test]
    async fn test_closed_without_terminal() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::MaxRows).await.unwrap();
        drop(tx);
        let stream = EventStream::new(Operation::Search, rx);
        assert!(matches!(stream.collect().await, Err(ClientError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_collect_data_events() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::Line("{}".to_string())).await.unwrap();
        tx.send(Event::Finish).await.unwrap();
        drop(tx);

        let events: Vec<_> = EventStream::new(Operation::Search, rx).collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Line(line) if line == "{}"));
    }

    #[tokio::test]
    async fn test_stream_trait_yields_terminal() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::Finish).await.unwrap();
        drop(tx);

        let mut stream = EventStream::new(Operation::Login, rx);
        assert!(matches!(stream.next().await, Some(Event::Finish)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_stops_producer() {
        let (tx, rx) = mpsc::channel(4);
        EventStream::new(Operation::Search, rx).close();
        assert!(tx.is_closed());
        assert!(tx.send(Event::Finish).await.is_err());
    }
}
