//! Category loader: turns a category key into a cached, rendered category.
//!
//! `load` checks the cache first and only then goes to the network. Concurrent
//! loads of the same key share one fetch. Only the most recent `load` call
//! drives `LoaderState` and the presentation sink; an older call that finishes
//! late still fills the cache and returns its own result to its caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::cache::ContentCache;
use crate::error::{ErrorKind, LoaderError};
use crate::gateway::FetchGateway;
use crate::parser;
use crate::registry::{FeedRegistry, FeedSource};
use crate::renderer::{self, RenderedCategory};

type Outcome = Result<Arc<RenderedCategory>, LoaderError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Loading(String),
    Loaded(String),
    Failed(String, ErrorKind),
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderState::Idle => write!(f, "idle"),
            LoaderState::Loading(key) => write!(f, "loading {}", key),
            LoaderState::Loaded(key) => write!(f, "loaded {}", key),
            LoaderState::Failed(key, kind) => write!(f, "failed {} ({})", key, kind),
        }
    }
}

/// Handed to the presentation layer with a failure; pass it back to
/// [`CategoryLoader::retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAction {
    category_key: String,
}

impl RetryAction {
    pub fn category_key(&self) -> &str {
        &self.category_key
    }
}

#[derive(Debug, Clone)]
pub enum LoaderEvent {
    LoadingStarted(String),
    Loaded(Arc<RenderedCategory>),
    Failed {
        category_key: String,
        kind: ErrorKind,
        retry: RetryAction,
    },
}

/// Receives loader events. The loader never touches presentation state itself.
pub trait PresentationSink: Send + Sync {
    fn emit(&self, event: LoaderEvent);
}

impl<S: PresentationSink + ?Sized> PresentationSink for Arc<S> {
    fn emit(&self, event: LoaderEvent) {
        (**self).emit(event)
    }
}

/// Logs events and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn emit(&self, event: LoaderEvent) {
        match event {
            LoaderEvent::LoadingStarted(key) => debug!("Loading category '{}'", key),
            LoaderEvent::Loaded(rendered) => info!(
                "Category '{}' ready with {} articles",
                rendered.category_key,
                rendered.cards.len()
            ),
            LoaderEvent::Failed {
                category_key, kind, ..
            } => error!("Category '{}' failed: {}", category_key, kind),
        }
    }
}

/// Forwards events to a channel for an event-driven UI.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LoaderEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn emit(&self, event: LoaderEvent) {
        // A closed receiver means the UI went away
        let _ = self.tx.send(event);
    }
}

struct Current {
    state: LoaderState,
    generation: u64,
}

enum Flight {
    Lead(watch::Sender<Option<Outcome>>),
    Follow(watch::Receiver<Option<Outcome>>),
}

type InFlight = Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>;

/// Clears the in-flight marker when the leading fetch finishes or is dropped.
struct FlightGuard<'a> {
    in_flight: &'a InFlight,
    category_key: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(self.category_key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CategoryLoader<G, S = LogSink> {
    registry: FeedRegistry,
    gateway: G,
    cache: ContentCache,
    sink: S,
    current: Mutex<Current>,
    in_flight: InFlight,
}

impl<G: FetchGateway, S: PresentationSink> CategoryLoader<G, S> {
    pub fn new(registry: FeedRegistry, gateway: G, sink: S) -> Self {
        Self::with_cache(registry, gateway, sink, ContentCache::new())
    }

    pub fn with_cache(registry: FeedRegistry, gateway: G, sink: S, cache: ContentCache) -> Self {
        Self {
            registry,
            gateway,
            cache,
            sink,
            current: Mutex::new(Current {
                state: LoaderState::Idle,
                generation: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> LoaderState {
        lock(&self.current).state.clone()
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    /// Loads `category_key`, from the cache when possible.
    ///
    /// An unregistered key fails with `UnknownCategory` before any state
    /// change, event or network access. Network and parse failures move the
    /// loader to `Failed` and emit a retry action.
    pub async fn load(&self, category_key: &str) -> Result<Arc<RenderedCategory>, LoaderError> {
        let source = self.registry.resolve(category_key)?.clone();
        let generation = self.begin(category_key);

        if let Some(cached) = self.cache.get(category_key).await {
            debug!("Cache hit for '{}'", category_key);
            let outcome = Ok(cached);
            self.finish(generation, category_key, &outcome);
            return outcome;
        }

        let outcome = self.fetch_shared(&source).await;
        self.finish(generation, category_key, &outcome);
        outcome
    }

    pub async fn retry(&self, action: &RetryAction) -> Result<Arc<RenderedCategory>, LoaderError> {
        info!("Retrying category '{}'", action.category_key);
        self.load(&action.category_key).await
    }

    fn begin(&self, category_key: &str) -> u64 {
        let generation = {
            let mut current = lock(&self.current);
            current.generation += 1;
            current.state = LoaderState::Loading(category_key.to_string());
            current.generation
        };
        self.sink
            .emit(LoaderEvent::LoadingStarted(category_key.to_string()));
        generation
    }

    fn finish(&self, generation: u64, category_key: &str, outcome: &Outcome) {
        let event = {
            let mut current = lock(&self.current);
            if current.generation != generation {
                debug!(
                    "Load of '{}' was superseded by a newer request, not displaying",
                    category_key
                );
                return;
            }
            match outcome {
                Ok(rendered) => {
                    current.state = LoaderState::Loaded(category_key.to_string());
                    LoaderEvent::Loaded(rendered.clone())
                }
                Err(e) => {
                    let kind = e.kind();
                    current.state = LoaderState::Failed(category_key.to_string(), kind);
                    LoaderEvent::Failed {
                        category_key: category_key.to_string(),
                        kind,
                        retry: RetryAction {
                            category_key: category_key.to_string(),
                        },
                    }
                }
            }
        };
        self.sink.emit(event);
    }

    /// Single-flight fetch: the first caller for a key leads, later callers
    /// wait for its outcome. If the leader is dropped before finishing, a
    /// waiting caller takes over.
    async fn fetch_shared(&self, source: &FeedSource) -> Outcome {
        let key = source.category_key.as_str();
        loop {
            let flight = {
                let mut in_flight = lock(&self.in_flight);
                let existing = in_flight.get(key).cloned();
                match existing {
                    Some(rx) => Flight::Follow(rx),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key.to_string(), rx);
                        Flight::Lead(tx)
                    }
                }
            };

            match flight {
                Flight::Lead(tx) => return self.lead(source, tx).await,
                Flight::Follow(mut rx) => {
                    info!("Fetch for '{}' already in flight, waiting for it", key);
                    let shared = match rx.wait_for(Option::is_some).await {
                        Ok(value) => (*value).clone(),
                        Err(_) => None,
                    };
                    if let Some(outcome) = shared {
                        return outcome;
                    }
                    debug!("In-flight fetch for '{}' was abandoned, taking over", key);
                }
            }
        }
    }

    async fn lead(&self, source: &FeedSource, tx: watch::Sender<Option<Outcome>>) -> Outcome {
        let key = source.category_key.as_str();
        let _guard = FlightGuard {
            in_flight: &self.in_flight,
            category_key: key,
        };

        // A previous leader may have stored the entry between our cache check
        // and taking the in-flight slot.
        let outcome = match self.cache.get(key).await {
            Some(cached) => Ok(cached),
            None => {
                let outcome = self.fetch_and_render(source).await;
                if let Ok(rendered) = &outcome {
                    self.cache.put(key, rendered.clone()).await;
                }
                outcome
            }
        };

        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn fetch_and_render(&self, source: &FeedSource) -> Outcome {
        info!("Fetching feed: {} ({})", source.category_key, source.feed_url);

        let result = async {
            let payload = self.gateway.fetch_raw(&source.feed_url).await?;
            let articles = parser::parse(&payload)?;
            Ok::<_, LoaderError>(renderer::render(
                &source.category_key,
                &articles,
                &source.source_label,
            ))
        }
        .await;

        match result {
            Ok(rendered) => {
                info!(
                    "Rendered {} articles for '{}'",
                    rendered.cards.len(),
                    source.category_key
                );
                Ok(Arc::new(rendered))
            }
            Err(e) => {
                error!("Failed to load feed '{}': {}", source.category_key, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn feed_xml(titles: &[&str]) -> String {
        let items: String = titles
            .iter()
            .map(|t| {
                format!(
                    "<item><title>{t}</title><link>https://news.example.com/{t}</link>\
                     <description>About {t}</description></item>"
                )
            })
            .collect();
        format!(r#"<rss version="2.0"><channel><title>Feed</title>{items}</channel></rss>"#)
    }

    enum Reply {
        Feed(String),
        Raw(&'static str),
        Fail,
    }

    /// Gateway stub keyed by feed URL, with an optional per-URL delay.
    #[derive(Default)]
    struct StubGateway {
        replies: HashMap<String, (Reply, Duration)>,
        calls: AtomicUsize,
    }

    impl StubGateway {
        fn reply(mut self, url: &str, reply: Reply) -> Self {
            self.replies
                .insert(url.to_string(), (reply, Duration::ZERO));
            self
        }

        fn slow(mut self, url: &str, reply: Reply, delay: Duration) -> Self {
            self.replies.insert(url.to_string(), (reply, delay));
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchGateway for StubGateway {
        async fn fetch_raw(&self, feed_url: &str) -> Result<Vec<u8>, LoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (reply, delay) = self
                .replies
                .get(feed_url)
                .ok_or_else(|| LoaderError::Network(format!("no route to {}", feed_url)))?;
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            match reply {
                Reply::Feed(xml) => Ok(xml.clone().into_bytes()),
                Reply::Raw(body) => Ok(body.as_bytes().to_vec()),
                Reply::Fail => Err(LoaderError::Network("connection reset".to_string())),
            }
        }
    }

    /// Records every event for assertions.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<LoaderEvent>>,
    }

    impl RecordingSink {
        fn summary(&self) -> Vec<String> {
            lock(&self.events)
                .iter()
                .map(|e| match e {
                    LoaderEvent::LoadingStarted(k) => format!("loading {}", k),
                    LoaderEvent::Loaded(r) => format!("loaded {}", r.category_key),
                    LoaderEvent::Failed {
                        category_key, kind, ..
                    } => format!("failed {} {:?}", category_key, kind),
                })
                .collect()
        }
    }

    impl PresentationSink for RecordingSink {
        fn emit(&self, event: LoaderEvent) {
            lock(&self.events).push(event);
        }
    }

    const MUNDO: &str = "https://www.rtp.pt/noticias/rss/mundo";
    const PAIS: &str = "https://www.rtp.pt/noticias/rss/pais";

    fn registry() -> FeedRegistry {
        FeedRegistry::new([
            FeedSource::new("mundo", MUNDO, "RTP"),
            FeedSource::new("pais", PAIS, "RTP"),
        ])
        .unwrap()
    }

    fn loader(
        gateway: StubGateway,
    ) -> (
        CategoryLoader<Arc<StubGateway>, Arc<RecordingSink>>,
        Arc<StubGateway>,
        Arc<RecordingSink>,
    ) {
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingSink::default());
        let loader = CategoryLoader::new(registry(), gateway.clone(), sink.clone());
        (loader, gateway, sink)
    }

    mod cache_path_tests {
        use super::*;

        #[tokio::test]
        async fn test_second_load_served_from_cache() {
            let (loader, gateway, sink) =
                loader(StubGateway::default().reply(MUNDO, Reply::Feed(feed_xml(&["A", "B"]))));

            let first = loader.load("mundo").await.unwrap();
            let second = loader.load("mundo").await.unwrap();

            assert_eq!(gateway.calls(), 1);
            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(first.to_html().unwrap(), second.to_html().unwrap());
            assert_eq!(loader.state(), LoaderState::Loaded("mundo".to_string()));
            assert_eq!(
                sink.summary(),
                vec!["loading mundo", "loaded mundo", "loading mundo", "loaded mundo"]
            );
        }

        #[tokio::test]
        async fn test_injected_cache_is_used() {
            let cache = ContentCache::new();
            let prepared = Arc::new(renderer::render("pais", &[], "RTP"));
            cache.put("pais", prepared.clone()).await;

            let gateway = Arc::new(StubGateway::default());
            let loader = CategoryLoader::with_cache(registry(), gateway.clone(), LogSink, cache);

            let loaded = loader.load("pais").await.unwrap();

            assert!(Arc::ptr_eq(&loaded, &prepared));
            assert_eq!(gateway.calls(), 0);
        }

        #[tokio::test]
        async fn test_categories_cached_independently() {
            let (loader, gateway, _sink) = loader(
                StubGateway::default()
                    .reply(MUNDO, Reply::Feed(feed_xml(&["M"])))
                    .reply(PAIS, Reply::Feed(feed_xml(&["P1", "P2"]))),
            );

            loader.load("mundo").await.unwrap();
            let pais = loader.load("pais").await.unwrap();
            loader.load("mundo").await.unwrap();

            assert_eq!(gateway.calls(), 2);
            assert_eq!(pais.cards.len(), 2);
            assert_eq!(pais.cards[0].source, "RTP - Pais");
            assert_eq!(loader.cache().len().await, 2);
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_unknown_category_never_reaches_gateway() {
            let (loader, gateway, sink) = loader(StubGateway::default());

            let err = loader.load("desporto").await.unwrap_err();

            assert_eq!(err, LoaderError::UnknownCategory("desporto".to_string()));
            assert_eq!(gateway.calls(), 0);
            assert_eq!(loader.state(), LoaderState::Idle);
            assert!(sink.summary().is_empty());
        }

        #[tokio::test]
        async fn test_network_failure_leaves_cache_empty() {
            let (loader, gateway, sink) =
                loader(StubGateway::default().reply(MUNDO, Reply::Fail));

            let err = loader.load("mundo").await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Network);
            assert_eq!(gateway.calls(), 1);
            assert_eq!(
                loader.state(),
                LoaderState::Failed("mundo".to_string(), ErrorKind::Network)
            );
            assert!(!loader.cache().contains("mundo").await);
            assert_eq!(sink.summary(), vec!["loading mundo", "failed mundo Network"]);
        }

        #[tokio::test]
        async fn test_malformed_feed_fails_retryably() {
            let (loader, _gateway, _sink) =
                loader(StubGateway::default().reply(MUNDO, Reply::Raw("<html>502 Bad Gateway")));

            let err = loader.load("mundo").await.unwrap_err();

            assert_eq!(err.kind(), ErrorKind::MalformedFeed);
            assert!(err.kind().is_retryable());
            assert_eq!(
                loader.state(),
                LoaderState::Failed("mundo".to_string(), ErrorKind::MalformedFeed)
            );
            assert!(loader.cache().is_empty().await);
        }

        #[tokio::test]
        async fn test_retry_action_reloads_same_category() {
            let (loader, gateway, sink) =
                loader(StubGateway::default().reply(MUNDO, Reply::Fail));
            let _ = loader.load("mundo").await;

            let retry = lock(&sink.events)
                .iter()
                .find_map(|e| match e {
                    LoaderEvent::Failed { retry, .. } => Some(retry.clone()),
                    _ => None,
                })
                .unwrap();
            assert_eq!(retry.category_key(), "mundo");

            let err = loader.retry(&retry).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Network);
            assert_eq!(gateway.calls(), 2);
        }

        #[tokio::test]
        async fn test_failure_then_new_category_recovers() {
            let (loader, _gateway, _sink) = loader(
                StubGateway::default()
                    .reply(MUNDO, Reply::Fail)
                    .reply(PAIS, Reply::Feed(feed_xml(&["P"]))),
            );

            assert!(loader.load("mundo").await.is_err());
            loader.load("pais").await.unwrap();

            assert_eq!(loader.state(), LoaderState::Loaded("pais".to_string()));
        }
    }

    mod concurrency_tests {
        use super::*;

        #[tokio::test]
        async fn test_concurrent_loads_share_one_fetch() {
            let (loader, gateway, _sink) = loader(StubGateway::default().slow(
                MUNDO,
                Reply::Feed(feed_xml(&["A"])),
                Duration::from_millis(50),
            ));

            let (a, b) = tokio::join!(loader.load("mundo"), loader.load("mundo"));

            assert_eq!(gateway.calls(), 1);
            assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        }

        #[tokio::test]
        async fn test_state_is_loading_while_fetch_pending() {
            let (loader, _gateway, _sink) = loader(StubGateway::default().slow(
                MUNDO,
                Reply::Feed(feed_xml(&["A"])),
                Duration::from_millis(50),
            ));

            let (loaded, during) = tokio::join!(loader.load("mundo"), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                loader.state()
            });

            assert_eq!(during, LoaderState::Loading("mundo".to_string()));
            assert!(loaded.is_ok());
            assert_eq!(loader.state(), LoaderState::Loaded("mundo".to_string()));
        }

        #[tokio::test]
        async fn test_concurrent_loads_share_failure() {
            let (loader, gateway, _sink) = loader(StubGateway::default().slow(
                MUNDO,
                Reply::Fail,
                Duration::from_millis(50),
            ));

            let (a, b) = tokio::join!(loader.load("mundo"), loader.load("mundo"));

            assert_eq!(gateway.calls(), 1);
            assert_eq!(a.unwrap_err().kind(), ErrorKind::Network);
            assert_eq!(b.unwrap_err().kind(), ErrorKind::Network);
        }

        #[tokio::test]
        async fn test_stale_response_cached_but_not_displayed() {
            let (loader, _gateway, sink) = loader(
                StubGateway::default()
                    .slow(MUNDO, Reply::Feed(feed_xml(&["M"])), Duration::from_millis(80))
                    .reply(PAIS, Reply::Feed(feed_xml(&["P"]))),
            );

            let (mundo, pais) = tokio::join!(loader.load("mundo"), async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                loader.load("pais").await
            });

            assert!(mundo.is_ok());
            assert!(pais.is_ok());
            assert_eq!(loader.state(), LoaderState::Loaded("pais".to_string()));
            assert!(loader.cache().contains("mundo").await);
            assert_eq!(
                sink.summary(),
                vec!["loading mundo", "loading pais", "loaded pais"]
            );
        }

        #[tokio::test]
        async fn test_abandoned_leader_is_taken_over() {
            let (loader, gateway, _sink) = loader(StubGateway::default().slow(
                MUNDO,
                Reply::Feed(feed_xml(&["A"])),
                Duration::from_millis(50),
            ));

            let (abandoned, follower) = tokio::join!(
                tokio::time::timeout(Duration::from_millis(10), loader.load("mundo")),
                loader.load("mundo")
            );

            assert!(abandoned.is_err());
            assert_eq!(follower.unwrap().cards.len(), 1);
            assert_eq!(gateway.calls(), 2);
            assert!(lock(&loader.in_flight).is_empty());
        }
    }

    #[tokio::test]
    async fn test_channel_sink_receives_events() {
        let (sink, mut rx) = ChannelSink::new();
        let gateway = StubGateway::default().reply(MUNDO, Reply::Feed(feed_xml(&["A"])));
        let loader = CategoryLoader::new(registry(), gateway, sink);

        loader.load("mundo").await.unwrap();

        assert!(matches!(rx.recv().await, Some(LoaderEvent::LoadingStarted(k)) if k == "mundo"));
        match rx.recv().await {
            Some(LoaderEvent::Loaded(rendered)) => assert_eq!(rendered.cards[0].title, "A"),
            other => panic!("expected Loaded, got {:?}", other),
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LoaderState::Idle.to_string(), "idle");
        assert_eq!(
            LoaderState::Failed("mundo".to_string(), ErrorKind::Network).to_string(),
            "failed mundo (network error)"
        );
    }
}
