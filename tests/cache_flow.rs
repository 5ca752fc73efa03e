//! End-to-end behavior of the cache through the middleware pipeline and the
//! cache-aware router.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use vcache::cache::{CacheConfig, CacheLayer, MemoryStore, VaryRegistry, VaryStrategy};
use vcache::context::Context;
use vcache::middleware::{
    CacheMiddleware, MiddlewareHandler, Next, StripCookiesMiddleware, from_handler,
    from_middleware,
};
use vcache::{Method, Request, Response, Router, StatusCode};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const CONFIG: &str = r#"{
    "key_prefix": "it",
    "default_ttl_secs": 60,
    "strip_cookie_names": ["_ga", "_gid"],
    "hit_header": "X-Cache-Hit"
}"#;

fn registry() -> VaryRegistry {
    VaryRegistry::builder()
        .register("/dashboard", VaryStrategy::on_header_presence("Authorization"))
        .register("/about", VaryStrategy::shared())
        .build()
}

// Application handler: numbers every response so replays are recognizable.
fn numbered(calls: Arc<AtomicUsize>) -> MiddlewareHandler {
    from_handler(move |ctx: Context| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let who = if ctx.request().headers().contains("authorization") {
                "member"
            } else {
                "guest"
            };
            Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .header("Vary", "Cookie")
                .body(format!("{who} #{n}"))
        }
    })
}

struct Pipeline {
    chain: Vec<MiddlewareHandler>,
    layer: Arc<CacheLayer>,
    calls: Arc<AtomicUsize>,
    store: Arc<MemoryStore>,
}

impl Pipeline {
    fn new() -> Self {
        init_tracing();
        let config = CacheConfig::from_json(CONFIG).unwrap();
        let strip = StripCookiesMiddleware::from_config(&config).unwrap();
        let store = Arc::new(MemoryStore::new());
        let layer = Arc::new(CacheLayer::new(store.clone(), Arc::new(registry()), config));
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = vec![
            from_middleware(Arc::new(strip)),
            from_middleware(Arc::new(CacheMiddleware::new(layer.clone()))),
            numbered(calls.clone()),
        ];
        Self {
            chain,
            layer,
            calls,
            store,
        }
    }

    async fn send(&self, request: Request) -> Response {
        Next::new(self.chain.clone()).run(Context::new(request)).await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn get(path: &str) -> Request {
    Request::new(Method::Get, path).header("Host", "example.com")
}

fn body(response: &Response) -> String {
    String::from_utf8_lossy(response.payload()).into_owned()
}

#[tokio::test]
async fn second_request_is_replayed_verbatim() {
    let pipeline = Pipeline::new();

    let first = pipeline.send(get("/news")).await;
    assert_eq!(body(&first), "guest #1");
    assert!(!first.headers().contains("x-cache-hit"));
    assert!(first.etag().is_some());

    let second = pipeline.send(get("/news")).await;
    assert_eq!(body(&second), "guest #1");
    assert_eq!(second.headers().get("x-cache-hit"), Some("true"));
    assert_eq!(second.headers().get("vary"), Some("Cookie"));
    assert_eq!(second.etag(), first.etag());
    assert_eq!(pipeline.calls(), 1);
}

#[tokio::test]
async fn query_order_does_not_split_entries() {
    let pipeline = Pipeline::new();
    pipeline.send(get("/search?b=2&a=1")).await;
    let replay = pipeline.send(get("/search?a=1&b=2")).await;
    assert_eq!(body(&replay), "guest #1");
    assert_eq!(pipeline.calls(), 1);
}

#[tokio::test]
async fn tracking_cookies_are_stripped_before_keying() {
    let pipeline = Pipeline::new();
    pipeline
        .send(get("/news").header("Cookie", "_ga=GA1.2.111; _gid=GA1.2.9"))
        .await;
    let replay = pipeline
        .send(get("/news").header("Cookie", "_ga=GA1.2.222"))
        .await;
    assert_eq!(body(&replay), "guest #1");

    let personal = pipeline
        .send(get("/news").header("Cookie", "_ga=GA1.2.333; sessionid=abc"))
        .await;
    assert_eq!(body(&personal), "guest #2");
}

#[tokio::test]
async fn dashboard_varies_on_authentication_not_cookie() {
    let pipeline = Pipeline::new();

    let anon_a = pipeline.send(get("/dashboard").header("Cookie", "theme=dark")).await;
    let anon_b = pipeline.send(get("/dashboard").header("Cookie", "theme=light")).await;
    assert_eq!(body(&anon_a), "guest #1");
    assert_eq!(body(&anon_b), "guest #1");

    let member = get("/dashboard").header("Authorization", "Bearer x");
    assert_eq!(body(&pipeline.send(member.clone()).await), "member #2");
    assert_eq!(body(&pipeline.send(member).await), "member #2");
    assert_eq!(pipeline.calls(), 2);

    // The discriminator never leaks into a response header.
    for (_, value) in anon_b.headers().iter() {
        assert_ne!(value, "false");
    }
}

#[tokio::test]
async fn revalidation_yields_304_without_body() {
    let pipeline = Pipeline::new();
    let first = pipeline.send(get("/about")).await;
    let etag = first.etag().unwrap().to_owned();
    let last_modified = first.last_modified().unwrap().to_owned();

    let by_tag = pipeline.send(get("/about").header("If-None-Match", etag.as_str())).await;
    assert_eq!(by_tag.status(), StatusCode::NotModified);
    assert!(by_tag.payload().is_empty());
    assert_eq!(by_tag.etag(), Some(etag.as_str()));
    assert!(by_tag.headers().contains("cache-control"));
    assert!(!by_tag.headers().contains("content-type"));

    let by_date = pipeline
        .send(get("/about").header("If-Modified-Since", format!("{last_modified}; length=8")))
        .await;
    assert_eq!(by_date.status(), StatusCode::NotModified);

    let stale_tag = pipeline
        .send(
            get("/about")
                .header("If-None-Match", "\"stale\"")
                .header("If-Modified-Since", last_modified),
        )
        .await;
    assert_eq!(stale_tag.status(), StatusCode::Ok);
    assert_eq!(body(&stale_tag), "guest #1");
    assert_eq!(pipeline.calls(), 1);
}

#[tokio::test]
async fn last_modified_alone_revalidates_despite_if_none_match() {
    init_tracing();
    let config = CacheConfig::from_json(r#"{ "patch_headers": false }"#).unwrap();
    let layer = Arc::new(CacheLayer::new(
        Arc::new(MemoryStore::new()),
        Arc::new(VaryRegistry::default()),
        config,
    ));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(layer))),
        from_handler(move |_ctx: Context| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::Ok)
                    .header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")
                    .body("report")
            }
        }),
    ];
    let send = |request: Request| Next::new(chain.clone()).run(Context::new(request));

    let first = send(get("/report")).await;
    assert!(first.etag().is_none());

    let current = send(
        get("/report")
            .header("If-None-Match", "\"client-side\"")
            .header("If-Modified-Since", "Mon, 01 Jan 2024 00:00:00 GMT"),
    )
    .await;
    assert_eq!(current.status(), StatusCode::NotModified);
    assert!(current.payload().is_empty());

    let outdated = send(
        get("/report")
            .header("If-None-Match", "\"client-side\"")
            .header("If-Modified-Since", "Sun, 31 Dec 2023 00:00:00 GMT"),
    )
    .await;
    assert_eq!(outdated.status(), StatusCode::Ok);
    assert_eq!(body(&outdated), "report");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalidation_forces_a_fresh_render() {
    let pipeline = Pipeline::new();
    pipeline.send(get("/news")).await;

    let purge = Request::new(Method::Custom("PURGE".into()), "/news").header("Host", "example.com");
    assert!(pipeline.layer.invalidate(&purge).await.unwrap());
    assert!(pipeline.store.is_empty().await);

    assert_eq!(body(&pipeline.send(get("/news")).await), "guest #2");
}

#[tokio::test]
async fn entries_expire_after_max_age() {
    init_tracing();
    let layer = Arc::new(CacheLayer::new(
        Arc::new(MemoryStore::new()),
        Arc::new(VaryRegistry::default()),
        CacheConfig::default(),
    ));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let chain = vec![
        from_middleware(Arc::new(CacheMiddleware::new(layer))),
        from_handler(move |_ctx: Context| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::Ok).header("Cache-Control", "max-age=1")
            }
        }),
    ];

    let send = || Next::new(chain.clone()).run(Context::new(get("/short")));
    send().await;
    send().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    send().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn router_serves_concurrent_requests_from_one_entry() {
    init_tracing();
    let registry = VaryRegistry::builder()
        .register("/items/:id", VaryStrategy::on_cookie_value("lang"))
        .build();
    let layer = CacheLayer::new(
        Arc::new(MemoryStore::new()),
        Arc::new(registry),
        CacheConfig::default(),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut router = Router::with_cache(Arc::new(layer));
    router.get("/items/:id", move |ctx: Context| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let id = ctx.params().get("id").unwrap_or("").to_owned();
            let lang = ctx.request().cookies().get("lang").cloned().unwrap_or_default();
            Response::new(StatusCode::Ok).body(format!("{id}/{lang}"))
        }
    });
    let router = Arc::new(router);

    // Warm the entry, then fan out.
    router
        .route(get("/items/9").header("Cookie", "lang=en; visit=0"))
        .await;

    let mut tasks = Vec::new();
    for visit in 1..=16 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move {
            let cookie = format!("lang=en; visit={visit}");
            router.route(get("/items/9").header("Cookie", cookie)).await
        }));
    }
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body(&response), "9/en");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let french = router
        .route(get("/items/9").header("Cookie", "lang=fr"))
        .await;
    assert_eq!(body(&french), "9/fr");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
