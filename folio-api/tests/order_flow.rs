use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use folio_api::{
    app,
    middleware::{AdminClaims, ResiliencyState},
    state::{AppState, AuthConfig, RateLimitSettings},
};
use folio_catalog::{CurrencyCode, StaticRateTable, Template, TemplateStatus};
use folio_core::signature::SignatureKeys;
use folio_order::memory::{InMemoryCatalog, InMemoryOrderStore, RecordingNotifier};
use folio_order::{
    ApprovalWorkflow, DownloadAuthorizer, MockPaymentGateway, OrderManager, OrderPolicy,
    PaymentOrchestrator, PaymentVerifier,
};
use folio_shared::models::events::NotificationEvent;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const JWT_SECRET: &str = "test-jwt-secret";

struct TestApp {
    router: Router,
    keys: SignatureKeys,
    gateway: Arc<MockPaymentGateway>,
    notifier: Arc<RecordingNotifier>,
}

fn template(id: i64, price: i64) -> Template {
    Template {
        id,
        title: format!("Template {}", id),
        slug: format!("template-{}", id),
        file_ref: format!("templates/{}.zip", id),
        price_minor: price,
        status: TemplateStatus::Active,
    }
}

fn test_app() -> TestApp {
    let keys = SignatureKeys::new("client-secret", "webhook-secret");
    let store = Arc::new(InMemoryOrderStore::new());
    let catalog = Arc::new(InMemoryCatalog::new([template(1, 50000), template(2, 30000)]));
    let inr = CurrencyCode::parse("INR").unwrap();
    let mut table = HashMap::new();
    table.insert("USD".to_string(), 12_000);
    let rates = Arc::new(StaticRateTable::new(inr.clone(), &table).unwrap());
    let gateway = Arc::new(MockPaymentGateway::new(keys.clone()));
    let payments = Arc::new(PaymentOrchestrator::new(gateway.clone(), Duration::from_secs(1)));
    let notifier = Arc::new(RecordingNotifier::new());
    let policy = Arc::new(OrderPolicy::new(inr));

    let state = AppState {
        orders: Arc::new(OrderManager::new(
            store.clone(),
            catalog,
            rates,
            payments.clone(),
            policy.clone(),
        )),
        verifier: Arc::new(PaymentVerifier::new(
            store.clone(),
            payments,
            notifier.clone(),
            policy.clone(),
        )),
        approvals: Arc::new(ApprovalWorkflow::new(store.clone(), notifier.clone(), policy)),
        downloads: Arc::new(DownloadAuthorizer::new(store)),
        rate_limiter: None,
        rate_limit: RateLimitSettings { requests: 100, window_seconds: 60 },
        auth: AuthConfig { secret: JWT_SECRET.to_string() },
        resiliency: Arc::new(ResiliencyState::new(2, Duration::from_secs(60))),
        allowed_origins: Vec::new(),
        trust_forwarded_for: false,
    };

    TestApp { router: app(state), keys, gateway, notifier }
}

fn admin_token(sub: &str, role: &str) -> String {
    let claims = AdminClaims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn post_json(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn create_order(&self) -> Value {
        let (status, body) = self
            .post_json(
                "/v1/orders",
                json!({
                    "email": "Jane@Example.com",
                    "name": "Jane Doe",
                    "template_ids": [1, 2]
                }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    async fn verify(&self, intent_id: &str, payment_id: &str, signature: &str) -> (StatusCode, Value) {
        self.post_json(
            "/v1/orders/verify",
            json!({ "intent_id": intent_id, "payment_id": payment_id, "signature": signature }),
            None,
        )
        .await
    }

    async fn pending_order_id(&self, admin: &str) -> i64 {
        let (status, body) = self.get("/v1/admin/orders/pending", Some(admin)).await;
        assert_eq!(status, StatusCode::OK);
        body["orders"][0]["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn purchase_approval_and_download_limit() {
    let app = test_app();
    let admin = admin_token("7", "ADMIN");

    let created = app.create_order().await;
    assert_eq!(created["total_minor"], 80000);
    assert_eq!(created["status"], "awaiting_payment");
    assert_eq!(created["payment"]["key_id"], "rzp_test_mock");
    assert_eq!(created["payment"]["amount_minor"], 80000);
    let order_number = created["order_number"].as_str().unwrap().to_string();
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();

    let signature = app.keys.sign_client(&intent_id, "pay_001");
    let (status, body) = app.verify(&intent_id, "pay_001", &signature).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "awaiting_approval");
    assert_eq!(body["already_confirmed"], false);

    // replay is a no-op
    let (status, body) = app.verify(&intent_id, "pay_001", &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_confirmed"], true);
    assert_eq!(app.notifier.count("ORDER_CONFIRMATION").await, 1);

    // not downloadable before approval
    let download_uri = format!(
        "/v1/orders/download?order_number={}&email=jane@example.com",
        order_number
    );
    let (status, body) = app.get(&download_uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "order_not_approved");

    let order_id = app.pending_order_id(&admin).await;
    let (status, body) = app
        .post_json(&format!("/v1/admin/orders/{}/approve", order_id), json!({}), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["reviewed_by"], 7);
    assert!(body.get("download_token").is_none());
    assert_eq!(app.notifier.count("ORDER_APPROVED").await, 1);

    for remaining in [2, 1, 0] {
        let (status, body) = app.get(&download_uri, None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["remaining_downloads"], remaining);
        assert_eq!(body["files"].as_array().unwrap().len(), 2);
    }

    let (status, body) = app.get(&download_uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "download_limit_exceeded");

    let (status, body) = app
        .get(
            &format!("/v1/orders/lookup?order_number={}&email=JANE@example.com", order_number),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "downloaded");
    assert_eq!(body["download_count"], 3);

    let (status, body) = app.get(&format!("/v1/admin/orders/{}", order_id), Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    let statuses: Vec<&str> = body["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["to_status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["pending", "paid", "approved", "completed"]);
    // three granted, one denied before approval, one denied at the limit
    assert_eq!(body["downloads"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn download_link_from_approval_email_works() {
    let app = test_app();
    let admin = admin_token("1", "SUPER_ADMIN");

    let created = app.create_order().await;
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();
    let signature = app.keys.sign_client(&intent_id, "pay_9");
    assert_eq!(app.verify(&intent_id, "pay_9", &signature).await.0, StatusCode::OK);

    let order_id = app.pending_order_id(&admin).await;
    let (status, _) = app
        .post_json(&format!("/v1/admin/orders/{}/approve", order_id), json!({}), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);

    let link = app
        .notifier
        .events()
        .await
        .into_iter()
        .find_map(|event| match event {
            NotificationEvent::OrderApproved(approved) => Some(approved.download_link),
            _ => None,
        })
        .unwrap();
    let token = link.split("token=").nth(1).unwrap().to_string();

    let (status, body) = app
        .get(&format!("/v1/orders/download?token={}&template_id=2", token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["files"].as_array().unwrap().len(), 1);
    assert_eq!(body["files"][0]["template_id"], 2);

    let (status, body) = app.get("/v1/orders/download?token=not-a-real-token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
}

#[tokio::test]
async fn tampered_signature_fails_the_order() {
    let app = test_app();
    let created = app.create_order().await;
    let order_number = created["order_number"].as_str().unwrap().to_string();
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();

    let mut signature = app.keys.sign_client(&intent_id, "pay_1");
    let last = if signature.ends_with('0') { "1" } else { "0" };
    signature.replace_range(signature.len() - 1.., last);

    let (status, body) = app.verify(&intent_id, "pay_1", &signature).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_signature");

    let valid = app.keys.sign_client(&intent_id, "pay_1");
    let (status, body) = app.verify(&intent_id, "pay_1", &valid).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_status");

    let (_, body) = app
        .get(
            &format!("/v1/orders/lookup?order_number={}&email=jane@example.com", order_number),
            None,
        )
        .await;
    assert_eq!(body["status"], "payment_failed");
    assert_eq!(app.notifier.count("ORDER_CONFIRMATION").await, 0);
}

#[tokio::test]
async fn webhook_confirms_payment_once_signature_checks_out() {
    let app = test_app();
    let created = app.create_order().await;
    let order_number = created["order_number"].as_str().unwrap().to_string();
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();

    let payload = json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": { "id": "pay_77", "order_id": intent_id } } }
    })
    .to_string();

    let webhook = |signature: String| {
        Request::builder()
            .method("POST")
            .uri("/v1/webhooks/razorpay")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Razorpay-Signature", signature)
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    // signed with the client secret instead of the webhook secret
    let wrong = app.keys.sign_client(&intent_id, "pay_77");
    let (status, _) = app.send(webhook(wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signature = app.keys.sign_webhook(payload.as_bytes());
    let (status, body) = app.send(webhook(signature.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["order_number"], order_number.as_str());

    let (status, body) = app.send(webhook(signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(app.notifier.count("ORDER_CONFIRMATION").await, 1);

    let ignored = json!({ "event": "refund.created", "payload": {} }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/razorpay")
        .header("X-Razorpay-Signature", app.keys.sign_webhook(ignored.as_bytes()))
        .body(Body::from(ignored))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn capture_on_a_failed_order_is_acknowledged_and_kept_for_refund() {
    let app = test_app();
    let admin = admin_token("4", "ADMIN");
    let created = app.create_order().await;
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();

    let (status, _) = app.verify(&intent_id, "pay_9", "deadbeef").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let payload = json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": { "id": "pay_9", "order_id": intent_id } } }
    })
    .to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/razorpay")
        .header("X-Razorpay-Signature", app.keys.sign_webhook(payload.as_bytes()))
        .body(Body::from(payload))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "refund_required");

    let (status, body) = app
        .get("/v1/admin/orders?status=failed&payment_status=success", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["total"], 1);
    let order_id = body["orders"][0]["id"].as_i64().unwrap();

    let (_, details) = app.get(&format!("/v1/admin/orders/{}", order_id), Some(&admin)).await;
    assert_eq!(details["order"]["gateway_payment_id"], "pay_9");
    let notes: Vec<&str> = details["history"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|h| h["note"].as_str())
        .collect();
    assert!(notes.iter().any(|n| n.contains("refund required")), "{:?}", notes);
    assert_eq!(app.notifier.count("ORDER_CONFIRMATION").await, 0);
}

#[tokio::test]
async fn admin_routes_require_an_admin_token() {
    let app = test_app();

    let (status, body) = app.get("/v1/admin/orders", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = app.get("/v1/admin/orders", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let customer = admin_token("5", "CUSTOMER");
    let (status, _) = app.get("/v1/admin/orders", Some(&customer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = admin_token("5", "ADMIN");
    let (status, body) = app.get("/v1/admin/orders?status=paid&sort=oldest", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn rejection_needs_a_reason_and_is_shown_to_the_customer() {
    let app = test_app();
    let admin = admin_token("3", "ADMIN");
    let created = app.create_order().await;
    let order_number = created["order_number"].as_str().unwrap().to_string();
    let intent_id = created["payment"]["intent_id"].as_str().unwrap().to_string();
    let signature = app.keys.sign_client(&intent_id, "pay_2");
    assert_eq!(app.verify(&intent_id, "pay_2", &signature).await.0, StatusCode::OK);

    let order_id = app.pending_order_id(&admin).await;
    let uri = format!("/v1/admin/orders/{}/reject", order_id);

    let (status, body) = app.post_json(&uri, json!({ "reason": "  " }), Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, body) = app
        .post_json(&uri, json!({ "reason": "Unlicensed use" }), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");

    // rejected orders cannot be approved afterwards
    let (status, _) = app
        .post_json(&format!("/v1/admin/orders/{}/approve", order_id), json!({}), Some(&admin))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = app
        .get(
            &format!("/v1/orders/lookup?order_number={}&email=jane@example.com", order_number),
            None,
        )
        .await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["rejection_reason"], "Unlicensed use");
    assert_eq!(app.notifier.count("ORDER_REJECTED").await, 1);
}

#[tokio::test]
async fn create_validates_input() {
    let app = test_app();

    let (status, body) = app
        .post_json(
            "/v1/orders",
            json!({ "email": "not-an-email", "name": "X", "template_ids": [1] }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = app
        .post_json(
            "/v1/orders",
            json!({ "email": "a@b.co", "name": "X", "template_ids": [1, 99] }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post_json(
            "/v1/orders",
            json!({ "email": "a@b.co", "name": "X", "template_ids": [1], "currency": "USD" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["display_currency"], "USD");
    assert_eq!(body["total_converted_minor"], 600);
}

#[tokio::test]
async fn repeated_gateway_failures_open_the_circuit() {
    let app = test_app();
    app.gateway.set_failing(true);

    let body = json!({ "email": "a@b.co", "name": "X", "template_ids": [1] });
    for _ in 0..2 {
        let (status, body) = app.post_json("/v1/orders", body.clone(), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "gateway_error");
    }

    app.gateway.set_failing(false);
    let (status, body) = app.post_json("/v1/orders", body, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "service_unavailable");

    // other public routes are unaffected
    let (status, _) = app.get("/v1/orders/lookup?order_number=ORD-x&email=a@b.co", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_requests_between_gateway_failures_do_not_hold_the_circuit_closed() {
    let app = test_app();
    app.gateway.set_failing(true);

    let good = json!({ "email": "a@b.co", "name": "X", "template_ids": [1] });
    let bad = json!({ "email": "not-an-email", "name": "X", "template_ids": [1] });

    let (status, _) = app.post_json("/v1/orders", good.clone(), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let (status, _) = app.post_json("/v1/orders", bad, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post_json("/v1/orders", good.clone(), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, body) = app.post_json("/v1/orders", good, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "service_unavailable");
}
