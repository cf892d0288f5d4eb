//! Scripted transport for tests.

use crate::error::TransportError;
use crate::transport::{ByteStream, Transport, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Clone)]
enum Route {
    Body { status: u16, body: Bytes },
    Fail(TransportError),
    Hang { prefix: Bytes, dropped: Arc<AtomicBool> },
}

/// Canned responses per path, delivered in fixed-size chunks.
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    chunk_size: AtomicUsize,
    calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            chunk_size: AtomicUsize::new(usize::MAX),
            calls: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn route(&self, path: &str, status: u16, body: &str) {
        self.routes.lock().insert(
            path.to_string(),
            Route::Body {
                status,
                body: Bytes::copy_from_slice(body.as_bytes()),
            },
        );
    }

    pub fn fail(&self, path: &str, err: TransportError) {
        self.routes.lock().insert(path.to_string(), Route::Fail(err));
    }

    /// Serves `prefix` and then never completes. The flag is set once the
    /// body is dropped.
    pub fn hang(&self, path: &str, prefix: &str) -> Arc<AtomicBool> {
        let dropped = Arc::new(AtomicBool::new(false));
        self.routes.lock().insert(
            path.to_string(),
            Route::Hang {
                prefix: Bytes::copy_from_slice(prefix.as_bytes()),
                dropped: dropped.clone(),
            },
        );
        dropped
    }

    pub fn set_chunk_size(&self, size: usize) {
        self.chunk_size.store(size.max(1), Ordering::SeqCst);
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().iter().filter(|(p, _)| p == path).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Largest number of canned bodies that were open at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_query(&self, path: &str) -> Option<Vec<(String, String)>> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, query)| query.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().push((path.to_string(), query.to_vec()));
        let route = self.routes.lock().get(path).cloned();

        match route {
            Some(Route::Body { status, body }) => {
                let size = self.chunk_size.load(Ordering::SeqCst);
                let chunks: Vec<Result<Bytes, TransportError>> = body
                    .chunks(size.min(body.len().max(1)))
                    .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                    .collect();
                // Yield between chunks so concurrent readers get interleaved
                let body = stream::iter(chunks)
                    .then(|chunk| async move {
                        tokio::task::yield_now().await;
                        chunk
                    })
                    .boxed();

                let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(open, Ordering::SeqCst);
                let body = TrackedBody {
                    inner: body,
                    in_flight: self.in_flight.clone(),
                };
                Ok(TransportResponse::new(status, body.boxed()))
            }
            Some(Route::Fail(err)) => Err(err),
            Some(Route::Hang { prefix, dropped }) => Ok(TransportResponse::new(
                200,
                HangingBody {
                    prefix: Some(prefix),
                    dropped,
                }
                .boxed(),
            )),
            None => Ok(TransportResponse::from_bytes(404, "Not Found")),
        }
    }
}

/// Counts itself as in flight until dropped.
struct TrackedBody {
    inner: ByteStream,
    in_flight: Arc<AtomicUsize>,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct HangingBody {
    prefix: Option<Bytes>,
    dropped: Arc<AtomicBool>,
}

impl Stream for HangingBody {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.prefix.take() {
            Some(prefix) => Poll::Ready(Some(Ok(prefix))),
            None => Poll::Pending,
        }
    }
}

impl Drop for HangingBody {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}
