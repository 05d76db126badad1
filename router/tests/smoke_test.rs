use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::Router;
use http::{Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;

use fleet_common::{HeadRecord, OperationResponse, RoutingDecision, RoutingPolicy, Strategy};
use fleet_router::auth::hash_token;
use fleet_router::config::ApiKeyConfig;
use fleet_router::test_util::{create_state_with, create_test_state, test_config, FailingStore};
use fleet_router::{app, AppState, MemoryStore};

fn test_app() -> Router {
    app(Arc::new(create_test_state()))
}

fn app_with(state: AppState) -> Router {
    app(Arc::new(state))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json<T: DeserializeOwned>(app: &Router, request: Request<Body>) -> (StatusCode, T) {
    let (status, body) = send(app, request).await;
    let parsed = serde_json::from_slice(&body)
        .unwrap_or_else(|e| panic!("bad body ({}): {}", e, String::from_utf8_lossy(&body)));
    (status, parsed)
}

async fn register(app: &Router, head_id: &str, region: &str, load: u32) {
    let (status, resp): (_, OperationResponse) = send_json(
        app,
        json_request(
            "POST",
            "/v1/heads",
            json!({
                "head_id": head_id,
                "endpoint": format!("http://{}:8080", head_id),
                "model_type": "llama-3",
                "region": region,
                "version": "1.0",
                "current_load": load
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(resp.success);
}

async fn route(app: &Router, body: Value) -> RoutingDecision {
    let (status, decision) = send_json(app, json_request("POST", "/v1/route", body)).await;
    assert_eq!(status, StatusCode::OK);
    decision
}

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, body): (_, Value) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["heads"], 0);
    assert_eq!(body["store_circuit"], "closed");
}

#[tokio::test]
async fn test_metrics() {
    let app = test_app();
    register(&app, "h1", "us-east-1", 0).await;
    route(&app, json!({"model_type": "llama-3", "region_preference": "us-east-1"})).await;

    let (status, body) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("fleet_up 1"));
    assert!(text.contains("fleet_heads 1"));
    assert!(text.contains("fleet_registrations_total 1"));
    assert!(text.contains(
        r#"fleet_decisions_total{strategy="least_loaded",model_type="llama-3",region="us-east-1"} 1"#
    ));
}

#[tokio::test]
async fn test_least_loaded_follows_heartbeats() {
    let app = test_app();
    register(&app, "h1", "us-east-1", 10).await;
    register(&app, "h2", "us-east-1", 20).await;

    let criteria = json!({
        "model_type": "llama-3",
        "region_preference": "us-east-1",
        "strategy": "least_loaded"
    });
    let decision = route(&app, criteria.clone()).await;
    assert_eq!(decision.head_id, "h1");
    assert_eq!(decision.endpoint, "http://h1:8080");
    assert_eq!(decision.strategy_used, "least_loaded");

    let (status, _): (_, OperationResponse) = send_json(
        &app,
        json_request(
            "PUT",
            "/v1/heads/h1/status",
            json!({"status": "active", "current_load": 80}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(route(&app, criteria.clone()).await.head_id, "h2");

    send(
        &app,
        json_request(
            "PUT",
            "/v1/heads/h2/status",
            json!({"status": "inactive", "current_load": 20}),
        ),
    )
    .await;
    assert_eq!(route(&app, criteria).await.head_id, "h1");
}

#[tokio::test]
async fn test_unknown_model_gives_empty_decision() {
    let app = test_app();
    register(&app, "h1", "", 0).await;

    let decision = route(&app, json!({"model_type": "no-such-model"})).await;
    assert!(decision.head_id.is_empty());
    assert_eq!(decision.strategy_used, "none");
    assert_eq!(decision.reason, "no available heads for model type");
}

#[tokio::test]
async fn test_register_is_idempotent() {
    let app = test_app();
    register(&app, "h1", "us-east-1", 0).await;
    register(&app, "h1", "eu-west-1", 5).await;

    let (status, heads): (_, Vec<HeadRecord>) = send_json(&app, get("/v1/heads")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].region, "eu-west-1");
    assert_eq!(heads[0].current_load, 5);
}

#[tokio::test]
async fn test_deregistered_head_never_routed() {
    let app = test_app();
    register(&app, "h1", "", 0).await;

    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/v1/heads/h1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for strategy in Strategy::ALL {
        let decision = route(
            &app,
            json!({"model_type": "llama-3", "strategy": strategy.as_str()}),
        )
        .await;
        assert!(decision.head_id.is_empty());
    }

    let (_, heads): (_, Vec<HeadRecord>) = send_json(&app, get("/v1/heads")).await;
    assert_eq!(heads.len(), 1);
    assert!(!heads[0].is_active());
}

#[tokio::test]
async fn test_status_update_unknown_head_is_404() {
    let app = test_app();
    let (status, resp): (_, OperationResponse) = send_json(
        &app,
        json_request(
            "PUT",
            "/v1/heads/ghost/status",
            json!({"status": "active", "current_load": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!resp.success);
    assert!(resp.message.contains("ghost"));
}

#[tokio::test]
async fn test_invalid_registration_is_400() {
    let app = test_app();
    let (status, resp): (_, OperationResponse) = send_json(
        &app,
        json_request(
            "POST",
            "/v1/heads",
            json!({"head_id": "h1", "endpoint": "", "model_type": "llama-3"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!resp.success);
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let app = test_app();
    let (status, _) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v1/heads")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_policy_roundtrip() {
    let app = test_app();
    let (_, policy): (_, RoutingPolicy) = send_json(&app, get("/v1/policy")).await;
    assert_eq!(policy.default_strategy, Strategy::LeastLoaded);

    let (status, resp): (_, OperationResponse) = send_json(
        &app,
        json_request(
            "PUT",
            "/v1/policy",
            json!({
                "default_strategy": "geo_preferred",
                "enable_geo_routing": true,
                "enable_load_balancing": false,
                "enable_model_specific": false,
                "strategy_config": {"growth_factor": "1.2"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(resp.success);

    let (_, policy): (_, RoutingPolicy) = send_json(&app, get("/v1/policy")).await;
    assert_eq!(policy.default_strategy, Strategy::GeoPreferred);
    assert!(!policy.enable_load_balancing);
    assert_eq!(policy.strategy_config["growth_factor"], "1.2");

    register(&app, "h1", "us", 0).await;
    register(&app, "h2", "eu", 50).await;
    let decision = route(&app, json!({"model_type": "llama-3", "region_preference": "eu"})).await;
    assert_eq!(decision.head_id, "h2");
    assert_eq!(decision.strategy_used, "geo_preferred");
}

#[tokio::test]
async fn test_cached_decision() {
    let app = test_app();
    register(&app, "h1", "", 0).await;

    let criteria = json!({"model_type": "llama-3", "strategy": "hybrid"});
    assert_eq!(route(&app, criteria.clone()).await.strategy_used, "hybrid");
    let cached = route(&app, criteria).await;
    assert_eq!(cached.strategy_used, "cached");
    assert_eq!(cached.head_id, "h1");
}

#[tokio::test]
async fn test_route_rate_limited_per_client() {
    let mut config = test_config();
    config.rate_limit.threshold = 2;
    let app = app_with(create_state_with(config, Arc::new(MemoryStore::new())));
    register(&app, "h1", "", 0).await;

    let from = |ip: &str| {
        let addr: SocketAddr = format!("{}:40000", ip).parse().unwrap();
        let mut request = json_request("POST", "/v1/route", json!({"model_type": "llama-3"}));
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    };

    assert_eq!(send(&app, from("10.0.0.1")).await.0, StatusCode::OK);
    assert_eq!(send(&app, from("10.0.0.1")).await.0, StatusCode::OK);

    let response = app.clone().oneshot(from("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    assert_eq!(send(&app, from("10.0.0.2")).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_persistence_failure_is_503_but_applied() {
    let app = app_with(create_state_with(test_config(), Arc::new(FailingStore)));
    let (status, resp): (_, OperationResponse) = send_json(
        &app,
        json_request(
            "POST",
            "/v1/heads",
            json!({"head_id": "h1", "endpoint": "http://h1:8080", "model_type": "llama-3"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!resp.success);

    let decision = route(&app, json!({"model_type": "llama-3"})).await;
    assert_eq!(decision.head_id, "h1");
}

#[tokio::test]
async fn test_api_key_roles() {
    let mut config = test_config();
    config.auth.api_keys = vec![
        ApiKeyConfig {
            key_sha256: hash_token("viewer-secret"),
            role: "viewer".to_string(),
            name: Some("dashboard".to_string()),
        },
        ApiKeyConfig {
            key_sha256: hash_token("admin-secret"),
            role: "admin".to_string(),
            name: None,
        },
    ];
    let app = app_with(create_state_with(config, Arc::new(MemoryStore::new())));

    let with_token = |mut request: Request<Body>, token: &str| {
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        request
    };

    // Public endpoints need no key.
    assert_eq!(send(&app, get("/health")).await.0, StatusCode::OK);

    assert_eq!(send(&app, get("/v1/heads")).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(
        send(&app, with_token(get("/v1/heads"), "wrong")).await.0,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        send(&app, with_token(get("/v1/heads"), "viewer-secret")).await.0,
        StatusCode::OK
    );

    let register_body = json!({"head_id": "h1", "endpoint": "http://h1:8080", "model_type": "llama-3"});
    assert_eq!(
        send(
            &app,
            with_token(json_request("POST", "/v1/heads", register_body.clone()), "viewer-secret")
        )
        .await
        .0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(
            &app,
            with_token(json_request("POST", "/v1/heads", register_body), "admin-secret")
        )
        .await
        .0,
        StatusCode::OK
    );

    let policy = json!({"default_strategy": "hybrid"});
    assert_eq!(
        send(
            &app,
            with_token(json_request("PUT", "/v1/policy", policy.clone()), "viewer-secret")
        )
        .await
        .0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(&app, with_token(json_request("PUT", "/v1/policy", policy), "admin-secret"))
            .await
            .0,
        StatusCode::OK
    );
}
