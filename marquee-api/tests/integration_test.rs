use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use marquee_api::{
    app,
    middleware::{StaffClaims, auth::{ROLE_ADMIN, ROLE_STAFF}},
    state::{AppState, AuthConfig},
    webhooks::{sign_payload, SIGNATURE_HEADER},
};
use marquee_core::repository::OrderRepository;
use marquee_core::{BookingRules, ManualClock, OrderStatus, RulesHolder, Showtime};
use marquee_order::{BookingEngine, Stores};
use marquee_store::{MemoryStore, RecordingPublisher};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test-staff-secret";
const WEBHOOK_SECRET: &str = "test-gateway-secret";

struct TestCinema {
    router: Router,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    showtime: Showtime,
    seats: Vec<Uuid>,
}

async fn cinema() -> TestCinema {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let clock = Arc::new(ManualClock::new(now));
    let rules = RulesHolder::new(BookingRules::default());

    let showtime = Showtime {
        id: Uuid::new_v4(),
        movie_id: Uuid::new_v4(),
        room_id: Uuid::new_v4(),
        starts_at: now + Duration::days(1),
        ends_at: now + Duration::days(1) + Duration::hours(2),
    };
    store.insert_showtime(showtime.clone()).await;

    let engine = BookingEngine::new(
        Stores::shared(store.clone()),
        Arc::new(RecordingPublisher::new()),
        rules.clone(),
        clock.clone(),
        b"api-test-secret",
    )
    .unwrap();

    let seats: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    engine.ledger.open_showtime(showtime.id, &seats).await.unwrap();

    let state = AppState {
        engine,
        rules,
        base_rules: BookingRules::default(),
        rules_source: store.clone(),
        redis: None,
        auth: AuthConfig {
            secret: JWT_SECRET.to_string(),
            payment_webhook_secret: WEBHOOK_SECRET.to_string(),
        },
    };

    TestCinema {
        router: app(state),
        store,
        clock,
        showtime,
        seats,
    }
}

fn token(role: &str) -> String {
    let claims = StaffClaims {
        sub: "door-7".to_string(),
        role: role.to_string(),
        cinema_id: Some("hcm-01".to_string()),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_as(uri: &str, body: Value, role: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(role)))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Gateway callback signed the way the real gateway signs it
fn post_payment(callback: Value) -> Request<Body> {
    let body = callback.to_string();
    let signature = sign_payload(WEBHOOK_SECRET, body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn checkout_body(showtime_id: Uuid, seats: &[Uuid]) -> Value {
    json!({
        "showtimeId": showtime_id,
        "seatIds": seats,
        "customer": { "type": "REGISTERED", "user_id": "u-42" },
    })
}

fn payment(order_id: &str, code: &str) -> Value {
    json!({
        "orderId": order_id,
        "resultCode": code,
        "transactionId": "TXN-9001",
        "amount": 180000,
        "paidAt": Utc::now(),
    })
}

#[tokio::test]
async fn test_checkout_pay_and_check_in() {
    let c = cinema().await;

    let seats_uri = format!("/v1/showtimes/{}/seats", c.showtime.id);

    let (status, seat_map) = send(&c.router, get(&seats_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat_map["availableCount"], 4);

    let (status, reserved) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..2])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reserved["status"], "PENDING");
    assert_eq!(reserved["tickets"].as_array().unwrap().len(), 2);
    let order_id = reserved["orderId"].as_str().unwrap().to_string();

    let seats_uri = format!("/v1/showtimes/{}/seats", c.showtime.id);

    let (_, seat_map) = send(&c.router, get(&seats_uri)).await;
    assert_eq!(seat_map["availableCount"], 2);

    let (status, paid) = send(&c.router, post_payment(payment(&order_id, "00"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["status"], "PAID");
    assert_eq!(paid["applied"], true);

    // Gateway retry of the same callback
    let (status, again) = send(&c.router, post_payment(payment(&order_id, "00"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["applied"], false);

    let (status, issued) = send(
        &c.router,
        post_json(&format!("/v1/orders/{}/redemption-token", order_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let payload = issued["payload"].as_str().unwrap().to_string();

    let (status, verified) = send(
        &c.router,
        post_json_as("/v1/redemptions/verify", json!({ "payload": payload }), ROLE_STAFF),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["isValid"], true);

    let (status, receipt) = send(
        &c.router,
        post_json_as("/v1/redemptions/redeem", json!({ "payload": payload }), ROLE_STAFF),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["orderId"], order_id.as_str());

    let (status, _) = send(
        &c.router,
        post_json_as("/v1/redemptions/redeem", json!({ "payload": payload }), ROLE_STAFF),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_seat_conflict_lists_unavailable_seats() {
    let c = cinema().await;

    let (status, _) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..2])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[1..3])),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "SeatConflict");
    assert_eq!(body["unavailableSeatIds"], json!([c.seats[1]]));

    // All-or-nothing: the free seat in the rejected request stays free
    let seats_uri = format!("/v1/showtimes/{}/seats", c.showtime.id);
    let (_, seat_map) = send(&c.router, get(&seats_uri)).await;
    assert_eq!(seat_map["availableCount"], 2);
}

#[tokio::test]
async fn test_idempotency_key_header_replays_order() {
    let c = cinema().await;
    let request = || {
        Request::builder()
            .method("POST")
            .uri("/v1/checkout")
            .header(header::CONTENT_TYPE, "application/json")
            .header("Idempotency-Key", "cart-77")
            .body(Body::from(checkout_body(c.showtime.id, &c.seats[..1]).to_string()))
            .unwrap()
    };

    let (status, first) = send(&c.router, request()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = send(&c.router, request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["orderId"], second["orderId"]);
    assert_eq!(c.store.order_count().await, 1);
}

#[tokio::test]
async fn test_conflicting_idempotency_keys_rejected() {
    let c = cinema().await;
    let mut body = checkout_body(c.showtime.id, &c.seats[..1]);
    body["idempotencyKey"] = json!("body-key");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/checkout")
        .header(header::CONTENT_TYPE, "application/json")
        .header("Idempotency-Key", "header-key")
        .body(Body::from(body.to_string()))
        .unwrap();

    let (status, _) = send(&c.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_releases_seats() {
    let c = cinema().await;
    let (_, reserved) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..3])),
    )
    .await;
    let order_id = reserved["orderId"].as_str().unwrap().to_string();

    let (status, cancelled) = send(
        &c.router,
        post_json(&format!("/v1/orders/{}/cancel", order_id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");

    let (status, order) = send(&c.router, get(&format!("/v1/orders/{}", order_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CANCELLED");

    let seats_uri = format!("/v1/showtimes/{}/seats", c.showtime.id);

    let (_, seat_map) = send(&c.router, get(&seats_uri)).await;
    assert_eq!(seat_map["availableCount"], 4);
}

#[tokio::test]
async fn test_declined_payment_fails_order() {
    let c = cinema().await;
    let (_, reserved) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..1])),
    )
    .await;
    let order_id = reserved["orderId"].as_str().unwrap().to_string();

    let (status, failed) = send(&c.router, post_payment(payment(&order_id, "24"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["status"], "FAILED");

    // A late success callback cannot resurrect the order
    let (status, late) = send(&c.router, post_payment(payment(&order_id, "00"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(late["status"], "FAILED");
    assert_eq!(late["applied"], false);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let c = cinema().await;
    let (status, _) = send(&c.router, get(&format!("/v1/orders/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &c.router,
        post_payment(payment(&Uuid::new_v4().to_string(), "00")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_staff_routes_require_token() {
    let c = cinema().await;

    let (status, body) = send(
        &c.router,
        post_json("/v1/redemptions/verify", json!({ "payload": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing bearer token");

    let (status, body) = send(
        &c.router,
        post_json_as("/v1/redemptions/verify", json!({ "payload": "x" }), "CUSTOMER"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("CUSTOMER"));

    // Garbage payload is a verification answer, not an error
    let (status, body) = send(
        &c.router,
        post_json_as("/v1/redemptions/verify", json!({ "payload": "x" }), ROLE_STAFF),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isValid"], false);
}

#[tokio::test]
async fn test_admin_jobs() {
    let c = cinema().await;
    send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..2])),
    )
    .await;

    let (status, _) = send(
        &c.router,
        post_json_as("/v1/admin/jobs/reclaim-expired", json!({}), ROLE_STAFF),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    c.clock.advance(Duration::minutes(16));
    let (status, report) = send(
        &c.router,
        post_json_as("/v1/admin/jobs/reclaim-expired", json!({}), ROLE_ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["reclaimed"], 1);

    let seats_uri = format!("/v1/showtimes/{}/seats", c.showtime.id);

    let (_, seat_map) = send(&c.router, get(&seats_uri)).await;
    assert_eq!(seat_map["availableCount"], 4);

    c.store
        .set_rule_override("hold_timeout_minutes", json!({ "value": 5 }))
        .await;
    let (status, rules) = send(
        &c.router,
        post_json_as("/v1/admin/jobs/refresh-rules", json!({}), ROLE_ADMIN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rules["changed"], true);
    assert_eq!(rules["rules"]["hold_timeout_minutes"], 5);
}

#[tokio::test]
async fn test_store_outage_is_service_unavailable() {
    let c = cinema().await;
    c.store.set_offline(true);

    let (status, _) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..1])),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unsigned_payment_callback_rejected() {
    let c = cinema().await;
    let (_, reserved) = send(
        &c.router,
        post_json("/v1/checkout", checkout_body(c.showtime.id, &c.seats[..1])),
    )
    .await;
    let order_id = reserved["orderId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &c.router,
        post_json("/v1/webhooks/payments", payment(&order_id, "00")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed for one body, delivered with another
    let signature = sign_payload(WEBHOOK_SECRET, payment(&order_id, "24").to_string().as_bytes())
        .unwrap();
    let forged = Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(payment(&order_id, "00").to_string()))
        .unwrap();
    let (status, _) = send(&c.router, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let order = c.store.get_order(order_id.parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}
