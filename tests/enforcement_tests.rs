//! End-to-end enforcement tests
//!
//! Drives the full router (identity → catalog → PDP → response) with
//! in-process PDP fakes:
//! - Allow / deny / missing identity / unknown resource / PDP timeout
//! - Method to action mapping as seen by the PDP
//! - Error bodies never carry resource fields
//! - Identity echo, health and the `/docs` alias
//! - Undecodable path ids still answer identity-first
//! - Client disconnect drops the in-flight PDP call
//! - Graceful shutdown: drain, then force close

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use authz_gateway::authz::{Action, AuthorizationQuery, Decision, PolicyDecisionPoint};
use authz_gateway::config::{Config, ExistencePolicy};
use authz_gateway::error::PolicyError;
use authz_gateway::gateway::Gateway;

const XFCC: &str = "x-forwarded-client-cert";
const API: &str = "By=spiffe://example.org/gateway;Hash=abc123;URI=spiffe://example.org/api";
const FOREIGN: &str = "URI=spiffe://other.org/api";

// ── PDP fakes ────────────────────────────────────────────────────────────────

/// Reference policy: callers from example.org may read anything but
/// top_secret and may not modify. Records every query it sees.
#[derive(Default)]
struct ReferencePdp {
    seen: Mutex<Vec<AuthorizationQuery>>,
}

impl ReferencePdp {
    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last(&self) -> AuthorizationQuery {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PolicyDecisionPoint for ReferencePdp {
    async fn check(&self, query: &AuthorizationQuery) -> Result<Decision, PolicyError> {
        self.seen.lock().unwrap().push(query.clone());

        let domain = query.principal.attributes.get("trustDomain");
        let category = query.resource.attributes.get("category");
        let allowed = domain == Some(&Value::from("example.org"))
            && category != Some(&Value::from("top_secret"))
            && query.action == Action::Read;

        Ok(if allowed { Decision::Allow } else { Decision::Deny })
    }
}

/// Answers after a fixed delay.
struct SlowPdp {
    delay: Duration,
    answer: Decision,
}

#[async_trait]
impl PolicyDecisionPoint for SlowPdp {
    async fn check(&self, _query: &AuthorizationQuery) -> Result<Decision, PolicyError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.answer)
    }
}

/// Never answers; records when a call starts and when its future is dropped.
#[derive(Default)]
struct HangingPdp {
    started: AtomicBool,
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PolicyDecisionPoint for HangingPdp {
    async fn check(&self, _query: &AuthorizationQuery) -> Result<Decision, PolicyError> {
        let _flag = DropFlag(Arc::clone(&self.dropped));
        self.started.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Fails every call.
struct BrokenPdp;

#[async_trait]
impl PolicyDecisionPoint for BrokenPdp {
    async fn check(&self, _query: &AuthorizationQuery) -> Result<Decision, PolicyError> {
        Err(PolicyError::Unavailable("connection refused".to_string()))
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn router_with(config: Config, pdp: Arc<dyn PolicyDecisionPoint>) -> Router {
    Gateway::with_pdp(config, pdp).unwrap().router()
}

fn router(pdp: Arc<dyn PolicyDecisionPoint>) -> Router {
    router_with(Config::default(), pdp)
}

fn request(method: &str, uri: &str, xfcc: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = xfcc {
        builder = builder.header(XFCC, value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    use tower::ServiceExt;

    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn assert_no_resource_fields(body: &[u8]) {
    let text = String::from_utf8_lossy(body);
    for leak in ["title", "owner", "category", "Lucius", "Bat mobile"] {
        assert!(!text.contains(leak), "body leaks {leak}: {text}");
    }
}

// ── scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn allowed_read_returns_document() {
    // GIVEN: an example.org caller and a public document
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    // WHEN
    let (status, _, body) = send(app, request("GET", "/resources/doc3", Some(API))).await;

    // THEN
    assert_eq!(status, StatusCode::OK);
    let doc = json(&body);
    assert_eq!(doc["id"], "doc3");
    assert_eq!(doc["title"], "Press release: Gotham marathon");
    assert_eq!(doc["category"], "public");
    assert_eq!(doc["owner"], "Jane Barton");
    assert_eq!(pdp.calls(), 1);
}

#[tokio::test]
async fn denied_read_is_unauthorized_without_fields() {
    // GIVEN: a top_secret document the policy denies
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    // WHEN
    let (status, _, body) = send(app, request("GET", "/resources/doc1", Some(API))).await;

    // THEN
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "Access denied");
    assert_no_resource_fields(&body);
    assert_eq!(pdp.calls(), 1);
}

#[tokio::test]
async fn missing_identity_is_forbidden_and_pdp_untouched() {
    // GIVEN: no forwarded client certificate header
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    // WHEN
    let (status, _, body) = send(app, request("GET", "/resources/doc2", None)).await;

    // THEN
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_no_resource_fields(&body);
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn malformed_identities_are_forbidden() {
    let pdp = Arc::new(ReferencePdp::default());

    for header in [
        "",
        "Hash=abc123",
        "URI=https://example.org/api",
        "URI=spiffe://",
        "URI=spiffe://example.org",
        "URI=spiffe://Example.org/api",
        "URI=not a uri",
    ] {
        let app = router(pdp.clone());
        let (status, _, _) = send(app, request("GET", "/resources/doc3", Some(header))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "header {header:?}");
    }
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn unknown_resource_is_not_found_and_pdp_untouched() {
    // GIVEN: a valid identity, an id outside the catalog
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    // WHEN
    let (status, _, body) = send(app, request("GET", "/resources/doc-unknown", Some(API))).await;

    // THEN
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"], "Not found");
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn undecodable_id_without_identity_is_forbidden() {
    // GIVEN: a path id that is not valid UTF-8 once decoded, no identity
    let pdp = Arc::new(ReferencePdp::default());

    for uri in ["/resources/%FF", "/docs/%C3%28"] {
        // WHEN
        let (status, _, body) = send(router(pdp.clone()), request("GET", uri, None)).await;

        // THEN: identity is judged before the id, with the generic body
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(json(&body)["error"], "Forbidden");
    }
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn undecodable_id_with_identity_is_not_found() {
    let pdp = Arc::new(ReferencePdp::default());

    let (status, _, body) =
        send(router(pdp.clone()), request("GET", "/resources/%FF", Some(API))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"], "Not found");
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn undecodable_id_is_concealed_like_any_unknown_id() {
    let mut config = Config::default();
    config.catalog.existence = ExistencePolicy::Conceal;
    let pdp = Arc::new(ReferencePdp::default());
    let app = router_with(config, pdp.clone());

    let (status, _, body) = send(app, request("DELETE", "/resources/%FF", Some(API))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "Access denied");
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn concealed_existence_answers_unknown_ids_as_denied() {
    let mut config = Config::default();
    config.catalog.existence = ExistencePolicy::Conceal;
    let pdp = Arc::new(ReferencePdp::default());
    let app = router_with(config, pdp.clone());

    let (status, _, body) = send(app, request("GET", "/resources/doc-unknown", Some(API))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "Access denied");
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn pdp_timeout_fails_closed() {
    // GIVEN: a PDP slower than the configured deadline
    let mut config = Config::default();
    config.pdp.timeout = Duration::from_millis(50);
    let pdp = Arc::new(SlowPdp {
        delay: Duration::from_secs(5),
        answer: Decision::Allow,
    });
    let app = router_with(config, pdp);

    // WHEN
    let started = Instant::now();
    let (status, _, body) = send(app, request("GET", "/resources/doc3", Some(API))).await;

    // THEN: the late allow never turns into a 200
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(&body)["error"], "Internal server error");
    assert_no_resource_fields(&body);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn pdp_error_fails_closed_with_generic_body() {
    let app = router(Arc::new(BrokenPdp));

    let (status, _, body) = send(app, request("GET", "/resources/doc3", Some(API))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8_lossy(&body);
    assert!(!text.contains("connection refused"));
    assert_no_resource_fields(&body);
}

// ── query contents ───────────────────────────────────────────────────────────

#[tokio::test]
async fn pdp_sees_caller_resource_and_action() {
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    send(app, request("GET", "/resources/doc2", Some(API))).await;

    let query = pdp.last();
    assert_eq!(query.principal.id, "spiffe://example.org/api");
    assert_eq!(query.principal.roles, vec!["api".to_string()]);
    assert_eq!(
        query.principal.attributes.get("trustDomain"),
        Some(&Value::from("example.org"))
    );
    assert_eq!(query.resource.kind, "document");
    assert_eq!(query.resource.id, "doc2");
    assert_eq!(query.resource.attributes.get("category"), Some(&Value::from("internal")));
    assert_eq!(query.action, Action::Read);
}

#[tokio::test]
async fn non_get_methods_are_modify() {
    let pdp = Arc::new(ReferencePdp::default());

    for method in ["POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"] {
        let app = router(pdp.clone());
        let (status, _, body) = send(app, request(method, "/resources/doc3", Some(API))).await;

        assert_eq!(pdp.last().action, Action::Modify, "{method}");
        // The reference policy never grants modify
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method}");
        assert_no_resource_fields(&body);
    }
}

#[tokio::test]
async fn foreign_trust_domain_is_denied_by_policy() {
    let pdp = Arc::new(ReferencePdp::default());
    let app = router(pdp.clone());

    let (status, _, _) = send(app, request("GET", "/resources/doc3", Some(FOREIGN))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        pdp.last().principal.attributes.get("trustDomain"),
        Some(&Value::from("other.org"))
    );
}

#[tokio::test]
async fn configured_roles_and_kind_reach_the_pdp() {
    let mut config = Config::default();
    config.pdp.principal_roles = vec!["service".to_string(), "reader".to_string()];
    config.pdp.resource_kind = "report".to_string();
    let pdp = Arc::new(ReferencePdp::default());
    let app = router_with(config, pdp.clone());

    send(app, request("GET", "/resources/doc3", Some(API))).await;

    let query = pdp.last();
    assert_eq!(query.principal.roles, vec!["service".to_string(), "reader".to_string()]);
    assert_eq!(query.resource.kind, "report");
}

#[tokio::test]
async fn identical_requests_get_identical_answers() {
    let pdp = Arc::new(ReferencePdp::default());
    let mut answers = Vec::new();

    for _ in 0..3 {
        let app = router(pdp.clone());
        let (status, _, body) = send(app, request("GET", "/resources/doc3", Some(API))).await;
        answers.push((status, body));
    }

    assert!(answers.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(pdp.calls(), 3);
}

// ── other routes ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn docs_alias_behaves_like_resources() {
    let pdp = Arc::new(ReferencePdp::default());

    let (status, _, body) =
        send(router(pdp.clone()), request("GET", "/docs/doc3", Some(API))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["id"], "doc3");

    let (status, _, _) = send(router(pdp.clone()), request("GET", "/docs/doc1", Some(API))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn root_echoes_caller_identity() {
    let pdp = Arc::new(ReferencePdp::default());

    let (status, _, body) = send(router(pdp.clone()), request("GET", "/", Some(API))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "Hello spiffe://example.org/api. Nothing to see here. Move on.\n"
    );

    let (status, _, _) = send(router(pdp.clone()), request("POST", "/", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn health_needs_no_identity() {
    let pdp = Arc::new(ReferencePdp::default());

    let (status, _, body) = send(router(pdp.clone()), request("GET", "/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    let health = json(&body);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(pdp.calls(), 0);
}

#[tokio::test]
async fn request_id_is_generated_or_propagated() {
    let pdp = Arc::new(ReferencePdp::default());

    let (_, headers, _) = send(router(pdp.clone()), request("GET", "/health", None)).await;
    assert!(headers.contains_key("x-request-id"));

    let mut req = request("GET", "/resources/doc3", Some(API));
    req.headers_mut()
        .insert("x-request-id", "trace-me".parse().unwrap());
    let (_, headers, _) = send(router(pdp), req).await;
    assert_eq!(headers["x-request-id"], "trace-me");
}

#[tokio::test]
async fn unrouted_paths_are_not_found() {
    let pdp = Arc::new(ReferencePdp::default());
    let (status, _, _) = send(router(pdp.clone()), request("GET", "/admin", Some(API))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(pdp.calls(), 0);
}

// ── shutdown ─────────────────────────────────────────────────────────────────

async fn spawn_gateway(
    config: Config,
    pdp: Arc<dyn PolicyDecisionPoint>,
) -> (
    String,
    tokio::sync::oneshot::Sender<()>,
    tokio::task::JoinHandle<authz_gateway::Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let gateway = Gateway::with_pdp(config, pdp).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(gateway.serve(listener, async {
        let _ = rx.await;
    }));
    (base, tx, handle)
}

#[tokio::test]
async fn shutdown_drains_in_flight_requests() {
    // GIVEN: a request already waiting on a slow PDP
    let mut config = Config::default();
    config.server.shutdown_timeout = Duration::from_secs(5);
    let pdp = Arc::new(SlowPdp {
        delay: Duration::from_millis(300),
        answer: Decision::Allow,
    });
    let (base, stop, handle) = spawn_gateway(config, pdp).await;

    let client = reqwest::Client::new();
    let in_flight = tokio::spawn(
        client
            .get(format!("{base}/resources/doc3"))
            .header(XFCC, API)
            .timeout(Duration::from_secs(5))
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    // WHEN
    stop.send(()).unwrap();

    // THEN: the request still completes with its real answer
    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let served = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(served.is_ok());
}

#[tokio::test]
async fn shutdown_forces_close_after_timeout() {
    // GIVEN: a request stuck on a PDP that outlives the drain deadline
    let mut config = Config::default();
    config.server.shutdown_timeout = Duration::from_millis(100);
    config.pdp.timeout = Duration::from_secs(30);
    let pdp = Arc::new(SlowPdp {
        delay: Duration::from_secs(60),
        answer: Decision::Allow,
    });
    let (base, stop, handle) = spawn_gateway(config, pdp).await;

    let client = reqwest::Client::new();
    let in_flight = tokio::spawn(
        client
            .get(format!("{base}/resources/doc3"))
            .header(XFCC, API)
            .timeout(Duration::from_secs(5))
            .send(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    // WHEN
    let started = Instant::now();
    stop.send(()).unwrap();

    // THEN: serve returns shortly after the deadline
    let served = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(served.is_ok());
    assert!(started.elapsed() < Duration::from_secs(3));

    // and the stranded request is answered with a 500, never an allow
    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status().as_u16(), 500);
}

// ── client disconnect ────────────────────────────────────────────────────────

#[tokio::test]
async fn client_disconnect_drops_pending_pdp_call() {
    // GIVEN: a request parked on a PDP that never answers, with a PDP
    // timeout far beyond the test so only the disconnect can end the call
    let mut config = Config::default();
    config.pdp.timeout = Duration::from_secs(60);
    let pdp = Arc::new(HangingPdp::default());
    let (base, _stop, _handle) = spawn_gateway(config, pdp.clone()).await;
    let addr = base.trim_start_matches("http://").to_string();

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let raw = format!("GET /resources/doc3 HTTP/1.1\r\nHost: {addr}\r\n{XFCC}: {API}\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || pdp.started.load(Ordering::SeqCst)).await,
        "PDP call never started"
    );
    assert!(!pdp.dropped.load(Ordering::SeqCst));

    // WHEN: the client goes away
    drop(stream);

    // THEN: the PDP future is dropped with it
    assert!(
        wait_until(Duration::from_secs(1), || pdp.dropped.load(Ordering::SeqCst)).await,
        "PDP call outlived the client connection"
    );
}
