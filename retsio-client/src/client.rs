//! High-level client API.
//!
//! Every operation is resolved through the capability table and runs on
//! its own spawned task, pushing [`Event`]s into a bounded channel. The
//! caller reads them through an [`EventStream`]; dropping that stream
//! cancels the task at its next chunk boundary.

use crate::config::ClientConfig;
use crate::error::{ClientError, TransportError};
use crate::event::{Event, EventStream, Metadata, MetadataSource};
use crate::session::{Session, SessionState};
use crate::transport::{ByteStream, Transport, TransportResponse};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use retsio_cache::{is_stale, CacheStore, FileCacheStore, MetadataCache, MetadataCacheEntry};
use retsio_protocol::xml::{parse_metadata, reply_status};
use retsio_protocol::{
    DecodeEvent, FrameKind, GetObjectOptions, InfoToken, MetadataOptions, Operation,
    ProtocolError, ResponseDecoder, ResultFormat, RowShaper, SearchOptions, ShapedItem,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A typed request for one protocol operation.
#[derive(Debug, Clone)]
pub enum Request {
    Login,
    Logout,
    Search(SearchOptions),
    GetMetadata(MetadataOptions),
    GetObject(GetObjectOptions),
    GetPayloadList,
    Action,
    ChangePassword,
    PostObject,
    Update,
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Login => Operation::Login,
            Request::Logout => Operation::Logout,
            Request::Search(_) => Operation::Search,
            Request::GetMetadata(_) => Operation::GetMetadata,
            Request::GetObject(_) => Operation::GetObject,
            Request::GetPayloadList => Operation::GetPayloadList,
            Request::Action => Operation::Action,
            Request::ChangePassword => Operation::ChangePassword,
            Request::PostObject => Operation::PostObject,
            Request::Update => Operation::Update,
        }
    }
}

/// High-level client for one RETS server.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    session: RwLock<Session>,
    cache: MetadataCache,
    /// Serializes Login negotiations.
    login_lock: Mutex<()>,
    /// One in-flight metadata fetch per cache key.
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Client {
    /// Creates a client caching metadata on disk under the configured
    /// directory, or the process temp directory.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let store: Arc<dyn CacheStore> = match config.cache_dir {
            Some(ref dir) => Arc::new(FileCacheStore::new(dir)),
            None => Arc::new(FileCacheStore::temp()),
        };
        Self::with_cache_store(config, transport, store)
    }

    /// Creates a client with an explicit cache store.
    pub fn with_cache_store(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let session = Session::new(config.server_url.clone(), config.login_path.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                session: RwLock::new(session),
                cache: MetadataCache::new(store),
                login_lock: Mutex::new(()),
                fetch_locks: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Starts an operation.
    ///
    /// Fails before any network call when the operation has no
    /// implementation or its capability path was never negotiated.
    pub fn invoke(&self, request: Request) -> Result<EventStream, ClientError> {
        let operation = request.operation();
        if !operation.is_implemented() {
            return Err(ClientError::NotImplemented(operation));
        }
        let path = self
            .inner
            .session
            .read()
            .capability(operation)
            .map(str::to_string)
            .ok_or(ClientError::CapabilityUnavailable(operation))?;

        tracing::debug!("Invoking {} at {}", operation, path);

        let (tx, rx) = mpsc::channel(self.inner.config.event_capacity);
        let inner = self.inner.clone();
        match request {
            Request::Login => {
                tokio::spawn(async move { inner.run_login(path, tx).await });
            }
            Request::Logout => {
                tokio::spawn(async move { inner.run_logout(path, tx).await });
            }
            Request::Search(options) => {
                tokio::spawn(async move { inner.run_search(path, options, tx).await });
            }
            Request::GetMetadata(options) => {
                tokio::spawn(async move { inner.run_metadata(options, tx).await });
            }
            _ => return Err(ClientError::NotImplemented(operation)),
        }
        Ok(EventStream::new(operation, rx))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Negotiates the session and waits for the outcome.
    pub async fn login(&self) -> Result<(), ClientError> {
        self.invoke(Request::Login)?.finish().await
    }

    /// Ends the session and waits for the outcome.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.invoke(Request::Logout)?.finish().await
    }

    /// Starts a search. Rows arrive on the returned stream.
    pub fn search(&self, options: SearchOptions) -> Result<EventStream, ClientError> {
        self.invoke(Request::Search(options))
    }

    /// Returns metadata from the cache when it is fresh, otherwise fetches
    /// and caches it.
    pub async fn get_metadata(&self, options: &MetadataOptions) -> Result<Metadata, ClientError> {
        self.inner.metadata(options).await
    }

    // =========================================================================
    // Session inspection
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.inner.session.read().state()
    }

    pub fn setting(&self, name: &str) -> Option<InfoToken> {
        self.inner.session.read().setting(name).cloned()
    }

    pub fn capability(&self, operation: Operation) -> Option<String> {
        self.inner
            .session
            .read()
            .capability(operation)
            .map(str::to_string)
    }

    pub fn capabilities(&self) -> BTreeMap<Operation, String> {
        self.inner.session.read().capabilities().clone()
    }

    pub fn settings(&self) -> HashMap<String, InfoToken> {
        self.inner.session.read().settings().clone()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("server_url", &self.inner.config.server_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// How a producer task ended.
enum Outcome {
    Completed,
    Cancelled,
}

impl Inner {
    async fn run_login(self: Arc<Self>, path: String, tx: mpsc::Sender<Event>) {
        let _guard = self.login_lock.lock().await;
        self.session.write().set_state(SessionState::Negotiating);

        let result = self.negotiate(&path, &tx).await;
        let state = match result {
            Ok(Outcome::Completed) => SessionState::Ready,
            _ => SessionState::Failed,
        };
        self.session.write().set_state(state);

        match &result {
            Ok(Outcome::Completed) => {
                let session = self.session.read();
                tracing::info!(
                    "Logged in to {} ({} capabilities, {} settings)",
                    session.server_url(),
                    session.capabilities().len(),
                    session.settings().len()
                );
            }
            Ok(Outcome::Cancelled) => tracing::debug!("Login cancelled"),
            Err(e) => tracing::warn!("Login failed: {}", e),
        }
        complete(&tx, result).await;
    }

    async fn negotiate(
        &self,
        path: &str,
        tx: &mpsc::Sender<Event>,
    ) -> Result<Outcome, ClientError> {
        let Some(mut exchange) = Exchange::open(self, path, &[], FrameKind::Login, tx).await?
        else {
            return Ok(Outcome::Cancelled);
        };

        loop {
            let event = match exchange.next(tx).await? {
                Step::Event(event) => event,
                Step::End => return Ok(Outcome::Completed),
                Step::Cancelled => return Ok(Outcome::Cancelled),
            };
            let event = match event {
                DecodeEvent::Capability { operation, path } => {
                    tracing::debug!("Capability {} -> {}", operation, path);
                    self.session.write().set_capability(operation, path.clone());
                    Event::Capability { operation, path }
                }
                DecodeEvent::Setting(token) => {
                    tracing::debug!("Setting {} = {}", token.name, token.value);
                    self.session.write().set_setting(token.clone());
                    Event::Setting(token)
                }
                _ => continue,
            };
            if !emit(tx, event).await {
                return Ok(Outcome::Cancelled);
            }
        }
    }

    async fn run_logout(self: Arc<Self>, path: String, tx: mpsc::Sender<Event>) {
        let result = self.end_session(&path, &tx).await;
        if let Ok(Outcome::Completed) = result {
            self.session.write().set_state(SessionState::Unauthenticated);
            tracing::info!("Logged out of {}", self.config.server_url);
        }
        complete(&tx, result).await;
    }

    async fn end_session(
        &self,
        path: &str,
        tx: &mpsc::Sender<Event>,
    ) -> Result<Outcome, ClientError> {
        let Some(mut exchange) = Exchange::open(self, path, &[], FrameKind::Status, tx).await?
        else {
            return Ok(Outcome::Cancelled);
        };
        loop {
            match exchange.next(tx).await? {
                Step::Event(_) => {}
                Step::End => return Ok(Outcome::Completed),
                Step::Cancelled => return Ok(Outcome::Cancelled),
            }
        }
    }

    async fn run_search(
        self: Arc<Self>,
        path: String,
        options: SearchOptions,
        tx: mpsc::Sender<Event>,
    ) {
        let result = self.search(&path, &options, &tx).await;
        if let Err(ref e) = result {
            tracing::warn!("Search failed: {}", e);
        }
        complete(&tx, result).await;
    }

    async fn search(
        &self,
        path: &str,
        options: &SearchOptions,
        tx: &mpsc::Sender<Event>,
    ) -> Result<Outcome, ClientError> {
        let query = options.to_query();
        let Some(mut exchange) = Exchange::open(self, path, &query, FrameKind::Tabular, tx).await?
        else {
            return Ok(Outcome::Cancelled);
        };

        if options.format == ResultFormat::StandardXml {
            let Some(body) = exchange.read_to_end(tx).await? else {
                return Ok(Outcome::Cancelled);
            };
            let document = parse_document(body)?;
            return Ok(if emit(tx, Event::Document(document)).await {
                Outcome::Completed
            } else {
                Outcome::Cancelled
            });
        }

        let object_mode = options.shape.object_mode;
        let mut shaper = RowShaper::new(options.shape);
        let mut rows = 0u64;
        loop {
            let event = match exchange.next(tx).await? {
                Step::Event(event) => event,
                Step::End => {
                    tracing::debug!("Search at {} returned {} rows", path, rows);
                    return Ok(Outcome::Completed);
                }
                Step::Cancelled => return Ok(Outcome::Cancelled),
            };
            let event = match event {
                DecodeEvent::Count(count) => Event::Count(count),
                DecodeEvent::MaxRows => Event::MaxRows,
                DecodeEvent::Columns(columns) => match shaper.columns(columns) {
                    Some(item) => shaped_event(item, object_mode)?,
                    None => continue,
                },
                DecodeEvent::Row(row) => {
                    rows += 1;
                    shaped_event(shaper.row(row)?, object_mode)?
                }
                _ => continue,
            };
            if !emit(tx, event).await {
                return Ok(Outcome::Cancelled);
            }
        }
    }

    async fn run_metadata(self: Arc<Self>, options: MetadataOptions, tx: mpsc::Sender<Event>) {
        let result = tokio::select! {
            _ = tx.closed() => return,
            result = self.metadata(&options) => result,
        };
        let result = match result {
            Ok(metadata) => {
                if emit(&tx, Event::Metadata(metadata)).await {
                    Ok(Outcome::Completed)
                } else {
                    Ok(Outcome::Cancelled)
                }
            }
            Err(e) => Err(e),
        };
        complete(&tx, result).await;
    }

    async fn metadata(&self, options: &MetadataOptions) -> Result<Metadata, ClientError> {
        let key = self.config.cache_key();
        let lock = self
            .fetch_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let live = self.session.read().metadata_stamp();
        match self.cache.load(&key) {
            Ok(Some(entry)) => {
                if !is_stale(&entry.stamp(), &live) {
                    tracing::debug!("Metadata cache hit for {}", key);
                    return Ok(Metadata {
                        source: MetadataSource::Cache,
                        payload: entry.payload,
                    });
                }
                tracing::info!(
                    "Metadata cache for {} is stale (cached {:?}, live {:?})",
                    key,
                    entry.timestamp,
                    live.timestamp
                );
            }
            Ok(None) => tracing::debug!("No metadata cache for {}", key),
            Err(e) => tracing::warn!("Ignoring unreadable metadata cache for {}: {}", key, e),
        }

        let path = self
            .session
            .read()
            .capability(Operation::GetMetadata)
            .map(str::to_string)
            .ok_or(ClientError::CapabilityUnavailable(Operation::GetMetadata))?;

        let payload = self
            .fetch_metadata(&path, options)
            .await
            .map_err(|e| ClientError::MetadataFetchFailed(Box::new(e)))?;

        let entry = MetadataCacheEntry::new(&live, payload);
        if let Err(e) = self.cache.save(&key, &entry) {
            tracing::warn!("Failed to write metadata cache for {}: {}", key, e);
        }
        Ok(Metadata {
            source: MetadataSource::Network,
            payload: entry.payload,
        })
    }

    async fn fetch_metadata(
        &self,
        path: &str,
        options: &MetadataOptions,
    ) -> Result<Value, ClientError> {
        tracing::debug!("Fetching metadata from {}", path);
        let response = send(self, path, &options.to_query()).await?;
        let body = read_body(response.body).await?;
        parse_document(body)
    }
}

/// Sends a request, failing on a non-2xx status.
async fn send(
    inner: &Inner,
    path: &str,
    query: &[(String, String)],
) -> Result<TransportResponse, ClientError> {
    let response = inner.transport.send(path, query).await?;
    if !response.is_success() {
        return Err(TransportError::Status(response.status).into());
    }
    Ok(response)
}

async fn read_body(mut body: ByteStream) -> Result<Vec<u8>, ClientError> {
    let mut data = Vec::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// Parses a tree-shaped body and checks its reply code.
fn parse_document(body: Vec<u8>) -> Result<Value, ClientError> {
    let text = String::from_utf8_lossy(&body);
    let document = parse_metadata(&text)?;
    if let Some((code, text)) = reply_status(&document) {
        if !code.is_success() {
            return Err(ProtocolError::Reply { code, text }.into());
        }
    }
    Ok(document)
}

fn shaped_event(item: ShapedItem, object_mode: bool) -> Result<Event, ClientError> {
    if !object_mode {
        return Ok(Event::Line(item.to_json_line()?));
    }
    Ok(match item {
        ShapedItem::Header(columns) => Event::Header(columns),
        ShapedItem::Row(row) => Event::Row(row),
        ShapedItem::Record(record) => Event::Record(record),
    })
}

/// Sends an event. Returns false once the receiver is gone.
async fn emit(tx: &mpsc::Sender<Event>, event: Event) -> bool {
    tx.send(event).await.is_ok()
}

/// Emits the single terminal event for a finished operation.
async fn complete(tx: &mpsc::Sender<Event>, result: Result<Outcome, ClientError>) {
    match result {
        Ok(Outcome::Completed) => {
            emit(tx, Event::Finish).await;
        }
        Ok(Outcome::Cancelled) => {}
        Err(e) => {
            emit(tx, Event::Error(e)).await;
        }
    }
}

enum Step {
    Event(DecodeEvent),
    End,
    Cancelled,
}

/// A response body being decoded as it arrives.
struct Exchange {
    body: ByteStream,
    decoder: ResponseDecoder,
    eof: bool,
}

impl Exchange {
    /// Sends the request. Returns `None` if the receiver went away first.
    async fn open(
        inner: &Inner,
        path: &str,
        query: &[(String, String)],
        kind: FrameKind,
        tx: &mpsc::Sender<Event>,
    ) -> Result<Option<Self>, ClientError> {
        let response = tokio::select! {
            _ = tx.closed() => return Ok(None),
            response = send(inner, path, query) => response?,
        };
        Ok(Some(Self {
            body: response.body,
            decoder: ResponseDecoder::new(kind),
            eof: false,
        }))
    }

    /// Returns the next decoded event, reading more of the body as needed.
    async fn next(&mut self, tx: &mpsc::Sender<Event>) -> Result<Step, ClientError> {
        loop {
            if let Some(event) = self.decoder.decode_next()? {
                return Ok(Step::Event(event));
            }
            if self.eof {
                return Ok(Step::End);
            }
            tokio::select! {
                _ = tx.closed() => return Ok(Step::Cancelled),
                chunk = self.body.next() => match chunk {
                    Some(chunk) => self.decoder.extend(&chunk?),
                    None => {
                        self.decoder.finish()?;
                        self.eof = true;
                    }
                },
            }
        }
    }

    /// Reads the rest of the body without decoding it.
    async fn read_to_end(
        &mut self,
        tx: &mpsc::Sender<Event>,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        let mut data = Vec::new();
        loop {
            tokio::select! {
                _ = tx.closed() => return Ok(None),
                chunk = self.body.next() => match chunk {
                    Some(chunk) => data.extend_from_slice(&chunk?),
                    None => return Ok(Some(data)),
                },
            }
        }
    }
}
