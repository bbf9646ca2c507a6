//! Engine behaviour against a scripted transport and an in-memory cache

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use retrievekit::identifier::{BucketedIds, TimeBucket};
use retrievekit::{
    CacheError, CacheMeta, CacheSlot, Clock, Cooperative, DomainRateLimiter, FetchError, FetchOutcome,
    FetchStrategy, Fetched, FixedClock, KeyValueCache, MemoryCache, MemoryCacheBackend, Pacing,
    ParseError, RetrievalContext, RetrievalEngine, RetrieveError, Retriever, RetrieverConfig,
    RetrieverParams, RetrieverRegistry, Transport,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers by URL:
/// - `.../fail*` fails with status 500
/// - `.../moved*` reports a redirect to `<url>/final`
/// - `.../bad*` returns content the parser rejects
/// - `.../empty*` returns content the parser maps to nothing
/// - `.../slow*` takes 200ms
/// - everything else returns `X` followed by the path
struct ScriptedTransport {
    calls: AtomicUsize,
    dispatched: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            dispatched: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatched
            .lock()
            .unwrap()
            .push((url.to_string(), tokio::time::Instant::now()));

        let path = url.splitn(4, '/').nth(3).unwrap_or_default().to_string();
        if path.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if path.starts_with("fail") {
            return Err(FetchError::Status { status: 500 });
        }
        if path.starts_with("moved") {
            return Ok(Fetched::new(format!("{url}/final"), "X-moved")
                .with_meta("last-modified", "Tue, 01 Jan 2024 00:00:00 GMT"));
        }
        if path.starts_with("bad") {
            return Ok(Fetched::new(url, "BAD"));
        }
        if path.starts_with("empty") {
            return Ok(Fetched::new(url, ""));
        }
        Ok(Fetched::new(url, format!("X{path}")))
    }
}

/// Maps raw `X...` to `Y...`, rejects `BAD`
struct ScriptedRetriever {
    ids: BucketedIds,
    strategy: Cooperative,
}

impl Retriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    fn description(&self) -> &str {
        "test retriever"
    }

    fn url_to_id(&self, url: &str, now: chrono::DateTime<Utc>) -> Result<String, String> {
        self.ids.url_to_id(url, now)
    }

    fn id_to_url(&self, _id: &str) -> Option<String> {
        None
    }

    fn list(&self, _n: usize) -> Vec<String> {
        Vec::new()
    }

    fn parse(&self, _url: &str, raw: &str) -> Result<String, ParseError> {
        if raw == "BAD" {
            return Err(ParseError::Invalid("bad".to_string()));
        }
        Ok(raw.replacen('X', "Y", 1))
    }

    fn strategy(&self) -> &dyn FetchStrategy {
        &self.strategy
    }
}

/// Memory cache whose writes fail for one identifier
struct FailingWrites {
    inner: MemoryCache,
    broken_id: String,
}

impl KeyValueCache for FailingWrites {
    fn has(&self, key: &str) -> bool {
        self.inner.has(key)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.load(key)
    }

    fn save(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        if key.starts_with(&self.broken_id) {
            return Err(CacheError::Io {
                key: key.to_string(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(key, value)
    }

    fn list(&self) -> Result<BTreeSet<String>, CacheError> {
        self.inner.list()
    }
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    cache: Arc<MemoryCache>,
    clock: Arc<FixedClock>,
}

impl Harness {
    fn new() -> Self {
        Self {
            transport: ScriptedTransport::new(),
            cache: Arc::new(MemoryCache::new()),
            clock: Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            )),
        }
    }

    fn engine(&self, config: RetrieverConfig) -> RetrievalEngine {
        self.engine_with(config, Pacing::NONE)
    }

    fn engine_with(&self, config: RetrieverConfig, pacing: Pacing) -> RetrievalEngine {
        self.engine_over(self.cache.clone(), config, pacing)
    }

    fn engine_over(
        &self,
        cache: Arc<dyn KeyValueCache>,
        config: RetrieverConfig,
        pacing: Pacing,
    ) -> RetrievalEngine {
        let retriever = ScriptedRetriever {
            ids: BucketedIds::new(TimeBucket::new(168).unwrap()),
            strategy: Cooperative::new(
                self.transport.clone(),
                Arc::new(DomainRateLimiter::new()),
                pacing,
            ),
        };
        RetrievalEngine::new(
            Box::new(retriever),
            cache,
            config,
            self.clock.clone(),
        )
    }

    fn slot(&self, id: &str, slot: CacheSlot) -> Option<String> {
        self.cache.text(&slot.key(id))
    }
}

/// Route library logs through the test harness; `RUST_LOG` picks the level
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn defaults() -> RetrieverConfig {
    RetrieverConfig::default()
}

#[tokio::test]
async fn test_fetch_then_serve_from_cache() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/doc";

    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Ydoc"));
    let id = engine.resolve(url).unwrap().id;
    assert_eq!(h.slot(&id, CacheSlot::Raw).as_deref(), Some("Xdoc"));
    assert_eq!(h.slot(&id, CacheSlot::Parsed).as_deref(), Some("Ydoc"));

    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Ydoc"));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_reparse_from_cached_raw() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/doc";
    let id = engine.resolve(url).unwrap().id;
    h.cache.save(&CacheSlot::Raw.key(&id), b"Xcached").unwrap();

    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Ycached"));
    assert_eq!(h.transport.calls(), 0);
    assert_eq!(h.slot(&id, CacheSlot::Parsed).as_deref(), Some("Ycached"));
}

#[tokio::test]
async fn test_force_parse_ignores_cached_parsed() {
    init_tracing();
    let h = Harness::new();
    let url = "https://example.com/doc";
    let id = h.engine(defaults()).resolve(url).unwrap().id;
    h.cache.save(&CacheSlot::Raw.key(&id), b"Xfresh").unwrap();
    h.cache.save(&CacheSlot::Parsed.key(&id), b"stale").unwrap();

    let engine = h.engine(RetrieverConfig::builder().force_parse(true).build());
    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Yfresh"));
    assert_eq!(h.transport.calls(), 0);
    assert_eq!(h.slot(&id, CacheSlot::Parsed).as_deref(), Some("Yfresh"));
}

#[tokio::test]
async fn test_without_update_cache_nothing_is_written() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(RetrieverConfig::builder().update_cache(false).build());

    // Miss: fetched and parsed, but not stored.
    assert_eq!(
        engine.retrieve("https://example.com/doc").await.unwrap().as_deref(),
        Some("Ydoc")
    );
    assert!(h.cache.snapshot().is_empty());

    // Raw-only hit: reparsed, parsed slot still not stored.
    let id = engine.resolve("https://example.com/other").unwrap().id;
    h.cache.save(&CacheSlot::Raw.key(&id), b"Xother").unwrap();
    let before = h.cache.snapshot();
    assert_eq!(
        engine.retrieve("https://example.com/other").await.unwrap().as_deref(),
        Some("Yother")
    );
    assert_eq!(h.cache.snapshot(), before);
}

#[tokio::test]
async fn test_force_fetch_overwrites_all_slots() {
    init_tracing();
    let h = Harness::new();
    let url = "https://example.com/doc";
    let id = h.engine(defaults()).resolve(url).unwrap().id;
    let old_meta = r#"{"url": "https://old.example.com/", "etag": "1"}"#;
    h.cache.save(&CacheSlot::Meta.key(&id), old_meta.as_bytes()).unwrap();
    h.cache.save(&CacheSlot::Raw.key(&id), b"old raw").unwrap();
    h.cache.save(&CacheSlot::Parsed.key(&id), b"old parsed").unwrap();

    let engine = h.engine(RetrieverConfig::builder().force_fetch(true).build());
    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Ydoc"));
    assert_eq!(h.transport.calls(), 1);

    assert_eq!(h.slot(&id, CacheSlot::Raw).as_deref(), Some("Xdoc"));
    assert_eq!(h.slot(&id, CacheSlot::Parsed).as_deref(), Some("Ydoc"));
    let meta: CacheMeta =
        serde_json::from_str(&h.slot(&id, CacheSlot::Meta).unwrap()).unwrap();
    assert_eq!(meta.url, url);
    assert!(meta.extra.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_order_and_failure_isolation() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(RetrieverConfig::builder().concurrency(3).build());
    let inputs = [
        "https://a.example.com/slow1",
        "https://b.example.com/fail",
        "https://c.example.com/p3",
        "https://d.example.com/bad",
        "https://e.example.com/empty",
    ];

    let results = engine.retrieve_many(&inputs).await.unwrap();

    assert_eq!(
        results,
        vec![Some("Yslow1".to_string()), None, Some("Yp3".to_string()), None, None]
    );
    assert_eq!(h.transport.calls(), 5);
}

#[tokio::test]
async fn test_parse_failure_keeps_raw() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/bad";

    assert_eq!(engine.retrieve(url).await.unwrap(), None);
    let id = engine.resolve(url).unwrap().id;
    assert_eq!(h.slot(&id, CacheSlot::Raw).as_deref(), Some("BAD"));
    assert!(h.slot(&id, CacheSlot::Meta).is_some());
    assert_eq!(h.slot(&id, CacheSlot::Parsed), None);

    // The cached raw is reparsed next time; no second fetch.
    assert_eq!(engine.retrieve(url).await.unwrap(), None);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_failed_refetch_keeps_previous_entry() {
    init_tracing();
    let h = Harness::new();
    let url = "https://example.com/bad";
    let id = h.engine(defaults()).resolve(url).unwrap().id;
    let old_meta = format!(r#"{{"url": "{url}"}}"#);
    h.cache.save(&CacheSlot::Meta.key(&id), old_meta.as_bytes()).unwrap();
    h.cache.save(&CacheSlot::Raw.key(&id), b"Xold").unwrap();
    h.cache.save(&CacheSlot::Parsed.key(&id), b"Yold").unwrap();

    let engine = h.engine(RetrieverConfig::builder().force_fetch(true).build());
    assert_eq!(engine.retrieve(url).await.unwrap(), None);
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.slot(&id, CacheSlot::Raw).as_deref(), Some("Xold"));
    assert_eq!(h.slot(&id, CacheSlot::Parsed).as_deref(), Some("Yold"));
    assert_eq!(h.slot(&id, CacheSlot::Meta), Some(old_meta));

    // Raw and parsed still agree, so reparsing reproduces the cached text.
    let engine = h.engine(RetrieverConfig::builder().force_parse(true).build());
    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Yold"));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_cache_write_failure_is_isolated() {
    init_tracing();
    let h = Harness::new();
    let broken = h.engine(defaults()).resolve("https://a.example.com/one").unwrap().id;
    let healthy = h.engine(defaults()).resolve("https://b.example.com/two").unwrap().id;
    let cache = Arc::new(FailingWrites {
        inner: MemoryCache::new(),
        broken_id: broken.clone(),
    });
    let engine = h.engine_over(cache.clone(), defaults(), Pacing::NONE);

    let results = engine
        .retrieve_many(&["https://a.example.com/one", "https://b.example.com/two"])
        .await
        .unwrap();

    assert_eq!(results, vec![Some("Yone".to_string()), Some("Ytwo".to_string())]);
    assert!(!cache.inner.has(&CacheSlot::Raw.key(&broken)));
    assert_eq!(cache.inner.text(&CacheSlot::Parsed.key(&healthy)).as_deref(), Some("Ytwo"));
}

#[tokio::test]
async fn test_fetch_failure_writes_nothing() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    assert_eq!(engine.retrieve("https://example.com/fail").await.unwrap(), None);
    assert!(h.cache.snapshot().is_empty());
}

#[tokio::test]
async fn test_redirect_recorded_in_meta() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/moved";

    assert_eq!(engine.retrieve(url).await.unwrap().as_deref(), Some("Y-moved"));
    let id = engine.resolve(url).unwrap().id;
    let meta: CacheMeta =
        serde_json::from_str(&h.slot(&id, CacheSlot::Meta).unwrap()).unwrap();
    assert_eq!(meta.url, url);
    assert_eq!(meta.redirect_url.as_deref(), Some("https://example.com/moved/final"));
    assert_eq!(meta.extra["last-modified"], "Tue, 01 Jan 2024 00:00:00 GMT");
}

#[tokio::test]
async fn test_no_redirect_recorded_for_same_url() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/doc";
    engine.retrieve(url).await.unwrap();

    let id = engine.resolve(url).unwrap().id;
    let meta = h.slot(&id, CacheSlot::Meta).unwrap();
    assert!(!meta.contains("redirect_url"));
}

#[tokio::test]
async fn test_identifier_stable_within_bucket_and_new_after() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    let url = "https://example.com/doc";

    let first = engine.resolve(url).unwrap().id;
    h.clock.advance(chrono::Duration::hours(1));
    assert_eq!(engine.resolve(url).unwrap().id, first);
    engine.retrieve(url).await.unwrap();

    h.clock.advance(chrono::Duration::hours(168));
    let second = engine.resolve(url).unwrap().id;
    assert_ne!(second, first);

    engine.retrieve(url).await.unwrap();
    assert_eq!(h.transport.calls(), 2);
    assert!(h.slot(&second, CacheSlot::Raw).is_some());
}

#[tokio::test]
async fn test_bare_identifier_resolution() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());

    let err = engine.retrieve("example_00000000_2025010100").await.unwrap_err();
    assert!(matches!(err, RetrieveError::Resolution { .. }));

    // A resolution failure fails the whole batch.
    let err = engine
        .retrieve_many(&["https://example.com/doc", "unknown-id"])
        .await
        .unwrap_err();
    assert!(matches!(err, RetrieveError::Resolution { ref input, .. } if input == "unknown-id"));
    assert_eq!(h.transport.calls(), 0);

    // Once cached, the identifier resolves through its meta record.
    let url = "https://example.com/doc";
    engine.retrieve(url).await.unwrap();
    let id = engine.resolve(url).unwrap().id;
    assert_eq!(engine.resolve(&id).unwrap().url, url);
    assert_eq!(engine.retrieve(&id).await.unwrap().as_deref(), Some("Ydoc"));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_cached_ids() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine(defaults());
    engine
        .retrieve_many(&["https://example.com/a", "https://example.com/fail"])
        .await
        .unwrap();

    let ids = engine.cached_ids().unwrap();
    assert_eq!(ids, vec![engine.resolve("https://example.com/a").unwrap().id]);
}

#[tokio::test(start_paused = true)]
async fn test_same_host_requests_are_paced() {
    init_tracing();
    let h = Harness::new();
    let min_gap = Duration::from_millis(500);
    let engine = h.engine_with(
        RetrieverConfig::builder().concurrency(4).build(),
        Pacing::new(min_gap, min_gap * 2),
    );
    let inputs: Vec<String> = (0..4).map(|i| format!("https://example.com/p{i}")).collect();

    let results = engine.retrieve_many(&inputs).await.unwrap();
    assert!(results.iter().all(Option::is_some));

    let mut times: Vec<tokio::time::Instant> = h
        .transport
        .dispatched
        .lock()
        .unwrap()
        .iter()
        .map(|(_, at)| *at)
        .collect();
    times.sort();
    assert_eq!(times.len(), 4);
    // Timers fire on millisecond boundaries.
    let tolerance = Duration::from_millis(1);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] + tolerance >= min_gap, "gap {:?}", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_different_hosts_are_not_paced() {
    init_tracing();
    let h = Harness::new();
    let engine = h.engine_with(
        RetrieverConfig::builder().concurrency(4).build(),
        Pacing::fixed(Duration::from_secs(5)),
    );
    let start = tokio::time::Instant::now();
    let inputs: Vec<String> = (0..4).map(|i| format!("https://h{i}.example.com/p")).collect();

    engine.retrieve_many(&inputs).await.unwrap();

    let dispatched = h.transport.dispatched.lock().unwrap();
    assert!(dispatched.iter().all(|(_, at)| *at - start < Duration::from_secs(1)));
}

#[test]
fn test_daily_listing_is_descending_and_side_effect_free() {
    init_tracing();
    let backend = Arc::new(MemoryCacheBackend::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap()));
    let context = RetrievalContext::new(backend.clone()).with_clock(clock.clone());
    let registry = RetrieverRegistry::with_defaults(context);
    let params = RetrieverParams::new().set("date_end", "20250102");
    let engine = registry.lookup("daily_news", &params).unwrap();

    let first = engine.list(5);
    assert_eq!(
        first,
        vec!["20250102", "20250101", "20241231", "20241230", "20241229"]
    );
    assert_eq!(engine.list(5), first);
    assert!(backend.cache("daily_news").snapshot().is_empty());
    assert_eq!(clock.now(), Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap());
}
