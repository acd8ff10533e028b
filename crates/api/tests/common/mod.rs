//! Shared harness for HTTP-level integration tests.
//!
//! Builds the full application router over a mock payment gateway and a
//! real (per-test) database, mirroring the construction in `main.rs` so the
//! tests exercise the same middleware stack production uses.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use worklane_api::config::ServerConfig;
use worklane_api::router::build_app_router;
use worklane_api::state::AppState;
use worklane_db::models::user::User;
use worklane_db::repositories::UserRepo;
use worklane_events::EventBus;
use worklane_gateway::webhook::sign_payload;
use worklane_gateway::{MockPaymentGateway, PaymentGateway};

/// Signing secret shared between the harness and the test config.
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        gateway_base_url: "http://gateway.invalid".to_string(),
        gateway_secret_key: "sk_test".to_string(),
        webhook_signing_secret: WEBHOOK_SECRET.to_string(),
    }
}

/// The application under test plus handles to its collaborators.
pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<MockPaymentGateway>,
    pub event_bus: Arc<EventBus>,
}

/// Build the full application router over a mock gateway.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let config = test_config();
    let gateway = Arc::new(MockPaymentGateway::new());
    let event_bus = Arc::new(EventBus::default());

    let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        gateway: gateway_dyn,
        event_bus: Arc::clone(&event_bus),
    };

    TestApp {
        router: build_app_router(state, &config),
        gateway,
        event_bus,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }

    /// Deliver a gateway webhook with a valid signature.
    pub async fn deliver_webhook(&self, event: Value) -> (StatusCode, Value) {
        let payload = event.to_string();
        let signature = sign_payload(WEBHOOK_SECRET, payload.as_bytes(), Utc::now());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/gateway")
            .header(CONTENT_TYPE, "application/json")
            .header("signature", signature)
            .body(Body::from(payload))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

/// The three actors every flow needs.
pub struct Parties {
    pub company: User,
    pub provider: User,
    pub admin: User,
}

/// Seed a company, a provider with a payout destination, and an admin.
pub async fn seed_parties(pool: &PgPool) -> Parties {
    seed_parties_with_payout(pool, Some("ba_test_1")).await
}

/// Seed parties with an explicit provider payout destination (or none).
pub async fn seed_parties_with_payout(pool: &PgPool, payout: Option<&str>) -> Parties {
    let company = UserRepo::create(pool, "company", "Acme Corp", None)
        .await
        .unwrap();
    let provider = UserRepo::create(pool, "provider", "Dev Studio", payout)
        .await
        .unwrap();
    let admin = UserRepo::create(pool, "admin", "Ops Admin", None)
        .await
        .unwrap();
    Parties {
        company,
        provider,
        admin,
    }
}

/// A milestone plan of N entries with the given amounts, due far in the
/// future, seq 1..=N.
pub fn plan(amounts: &[&str]) -> Value {
    let milestones: Vec<Value> = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            json!({
                "title": format!("Milestone {}", i + 1),
                "amount": amount,
                "due_date": "2030-01-01",
                "seq": i + 1,
            })
        })
        .collect();
    Value::Array(milestones)
}

/// Create a project, install the plan, and approve it from both sides.
/// Returns the project id and the milestone ids in plan order.
pub async fn locked_project(
    app: &TestApp,
    parties: &Parties,
    amounts: &[&str],
) -> (i64, Vec<i64>) {
    let total: Decimal = amounts.iter().map(|a| a.parse::<Decimal>().unwrap()).sum();

    let (status, body) = app
        .post(
            "/api/v1/projects",
            json!({
                "company_id": parties.company.id,
                "provider_id": parties.provider.id,
                "approved_price": total.to_string(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let project_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .put(
            &format!("/api/v1/projects/{project_id}/milestones"),
            json!({ "actor_id": parties.company.id, "milestones": plan(amounts) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    for actor_id in [parties.company.id, parties.provider.id] {
        let (status, body) = app
            .post(
                &format!("/api/v1/projects/{project_id}/milestones/approve"),
                json!({ "actor_id": actor_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = app
        .get(&format!("/api/v1/projects/{project_id}/milestones"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    (project_id, ids)
}

/// Begin escrow funding for a milestone. Returns the payment id, intent id,
/// and the charge id the mock gateway assigned to the intent.
pub async fn initiate_payment(
    app: &TestApp,
    company_id: i64,
    milestone_id: i64,
    amount: &str,
) -> (i64, String, String) {
    let (status, body) = app
        .post(
            &format!("/api/v1/milestones/{milestone_id}/payments"),
            json!({ "actor_id": company_id, "amount": amount }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let payment_id = body["data"]["id"].as_i64().unwrap();
    let intent_id = body["data"]["gateway_intent_id"]
        .as_str()
        .unwrap()
        .to_string();
    let charge_id = app.gateway.charge_id_for(&intent_id).unwrap();
    (payment_id, intent_id, charge_id)
}

/// Deliver a successful checkout webhook for an already-initiated intent.
pub async fn fund_via_intent(app: &TestApp, payment_id: i64, intent_id: &str) {
    let charge_id = app.gateway.charge_id_for(intent_id).unwrap();
    let (status, body) = app
        .deliver_webhook(json!({
            "id": format!("evt_fund_{payment_id}"),
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": intent_id, "latest_charge": charge_id } },
        }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

/// Fund a milestone end to end: initiate, then simulate a successful
/// checkout via a signed `payment_intent.succeeded` delivery.
pub async fn fund_milestone(
    app: &TestApp,
    company_id: i64,
    milestone_id: i64,
    amount: &str,
) -> i64 {
    let (payment_id, intent_id, _) =
        initiate_payment(app, company_id, milestone_id, amount).await;
    fund_via_intent(app, payment_id, &intent_id).await;
    payment_id
}

/// Provider submits the milestone and the company approves it.
pub async fn submit_and_approve(app: &TestApp, parties: &Parties, milestone_id: i64) {
    let (status, body) = app
        .post(
            &format!("/api/v1/milestones/{milestone_id}/submit"),
            json!({ "actor_id": parties.provider.id, "note": "done" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .post(
            &format!("/api/v1/milestones/{milestone_id}/approve"),
            json!({ "actor_id": parties.company.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

/// Parse a decimal JSON field regardless of string or number encoding.
pub fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        Value::Number(n) => n.to_string().parse().unwrap(),
        other => panic!("not a decimal value: {other}"),
    }
}

/// Fetch a payment through the API.
pub async fn get_payment(app: &TestApp, payment_id: i64) -> Value {
    let (status, body) = app.get(&format!("/api/v1/payments/{payment_id}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"].clone()
}

/// Fetch a milestone's current state through the project listing.
pub async fn get_milestone(app: &TestApp, project_id: i64, milestone_id: i64) -> Value {
    let (status, body) = app
        .get(&format!("/api/v1/projects/{project_id}/milestones"))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"].as_i64() == Some(milestone_id))
        .cloned()
        .unwrap()
}

/// Fetch a project through the API.
pub async fn get_project(app: &TestApp, project_id: i64) -> Value {
    let (status, body) = app.get(&format!("/api/v1/projects/{project_id}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"].clone()
}

/// Audit trail actions for a payment, oldest first.
pub async fn audit_actions(app: &TestApp, payment_id: i64) -> Vec<String> {
    let (status, body) = app
        .get(&format!("/api/v1/payments/{payment_id}/audit"))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect()
}
