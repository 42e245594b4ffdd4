use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use bikerent::config::AppConfig;
use bikerent::db;
use bikerent::handlers;
use bikerent::services::notifications::Notifier;
use bikerent::services::payments::{
    hmac_sha256_hex, hmac_sha256_hex_matches, GatewayOrder, GatewayPayment, PaymentGateway,
};
use bikerent::state::AppState;

const KEY_SECRET: &str = "test-key-secret";
const WEBHOOK_SECRET: &str = "test-webhook-secret";

// ── Mock Providers ──

struct MockGateway {
    /// Amount the gateway reports for any fetched payment; `None` echoes the order.
    amount_minor: Option<i64>,
    orders: Mutex<Vec<(String, i64)>>,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            amount_minor: None,
            orders: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> anyhow::Result<GatewayOrder> {
        let id = format!("order_{}", receipt.replace('-', ""));
        self.orders.lock().unwrap().push((id.clone(), amount_minor));
        Ok(GatewayOrder {
            id,
            amount_minor,
            currency: currency.to_string(),
            receipt: Some(receipt.to_string()),
        })
    }

    fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        hmac_sha256_hex_matches(
            KEY_SECRET,
            format!("{order_id}|{payment_id}").as_bytes(),
            signature,
        )
    }

    async fn fetch_payment(&self, payment_id: &str) -> anyhow::Result<GatewayPayment> {
        let (order_id, ordered) = self
            .orders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no order"))?;
        Ok(GatewayPayment {
            id: payment_id.to_string(),
            order_id: Some(order_id),
            amount_minor: self.amount_minor.unwrap_or(ordered),
            currency: "INR".to_string(),
            status: "captured".to_string(),
            method: Some("card".to_string()),
        })
    }

    async fn refund(&self, payment_id: &str, _amount_minor: i64) -> anyhow::Result<String> {
        Ok(format!("rfnd_{payment_id}"))
    }
}

struct MockNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, recipient: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), subject.to_string()));
        Ok(())
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        database_url: ":memory:".to_string(),
        razorpay_key_id: "rzp_test".to_string(),
        razorpay_key_secret: KEY_SECRET.to_string(),
        razorpay_webhook_secret: WEBHOOK_SECRET.to_string(),
        ..AppConfig::default()
    }
}

fn build_state(gateway: MockGateway) -> (Arc<AppState>, Arc<Mutex<Vec<(String, String)>>>) {
    let conn = db::init_db(":memory:").unwrap();
    let sent = Arc::new(Mutex::new(vec![]));
    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: test_config(),
        payments: Box::new(gateway),
        notifier: Box::new(MockNotifier {
            sent: Arc::clone(&sent),
        }),
    });
    (state, sent)
}

fn test_state() -> Arc<AppState> {
    build_state(MockGateway::new()).0
}

fn test_app(state: Arc<AppState>) -> Router {
    handlers::router(state)
}

fn day(offset: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(offset)
}

fn request(method: &str, uri: &str, actor: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let res: Response<Body> = test_app(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

async fn create_bike(state: &Arc<AppState>, vendor: &str, rate: &str) -> String {
    let (status, json) = send(
        state,
        request(
            "POST",
            "/api/bikes",
            Some((vendor, "vendor")),
            Some(json!({ "name": "Royal Enfield Hunter", "daily_rate": rate, "security_deposit": "2500" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_str().unwrap().to_string()
}

async fn book(
    state: &Arc<AppState>,
    customer: &str,
    bike_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> (StatusCode, Value) {
    send(
        state,
        request(
            "POST",
            "/api/bookings",
            Some((customer, "customer")),
            Some(json!({ "bike_id": bike_id, "start_date": start, "end_date": end })),
        ),
    )
    .await
}

async fn set_status(
    state: &Arc<AppState>,
    actor: (&str, &str),
    booking_id: &str,
    status: &str,
) -> (StatusCode, Value) {
    send(
        state,
        request(
            "POST",
            &format!("/api/bookings/{booking_id}/status"),
            Some(actor),
            Some(json!({ "status": status })),
        ),
    )
    .await
}

fn checkout_signature(order_id: &str, payment_id: &str) -> String {
    hmac_sha256_hex(KEY_SECRET, format!("{order_id}|{payment_id}").as_bytes()).unwrap()
}

// ── Health Check ──

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let (status, json) = send(&state, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

// ── Auth ──

#[tokio::test]
async fn test_requires_identity() {
    let state = test_state();

    let (status, json) = send(&state, request("GET", "/api/bookings", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "unauthorized");

    let (status, _) = send(
        &state,
        request("GET", "/api/bookings", Some(("x", "system")), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Pricing & Availability ──

#[tokio::test]
async fn test_quote_three_days() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "100").await;

    let uri = format!(
        "/api/bikes/{bike_id}/quote?start_date={}&end_date={}",
        day(5),
        day(8)
    );
    let (status, json) = send(&state, request("GET", &uri, Some(("cust-1", "customer")), None)).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["duration_days"], 3);
    assert_eq!(dec(&json["base_amount"]), Decimal::new(300, 0));
    assert_eq!(dec(&json["tax_amount"]), Decimal::new(54, 0));
    assert_eq!(dec(&json["total_amount"]), Decimal::new(354, 0));
}

#[tokio::test]
async fn test_availability_endpoint() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;
    book(&state, "cust-1", &bike_id, day(10), day(12)).await;

    let check = |start: i64, end: i64| {
        format!(
            "/api/bikes/{bike_id}/availability?start_date={}&end_date={}",
            day(start),
            day(end)
        )
    };

    let (_, json) = send(&state, request("GET", &check(12, 14), Some(("cust-2", "customer")), None)).await;
    assert_eq!(json["available"], false);

    let (_, json) = send(&state, request("GET", &check(13, 15), Some(("cust-2", "customer")), None)).await;
    assert_eq!(json["available"], true);

    let (status, _) = send(&state, request("GET", &check(15, 13), Some(("cust-2", "customer")), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Booking Lifecycle ──

#[tokio::test]
async fn test_overlap_scenario() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;

    let (status, a) = book(&state, "cust-a", &bike_id, day(10), day(12)).await;
    assert_eq!(status, StatusCode::CREATED, "{a}");
    let (status, _) = set_status(&state, ("vendor-1", "vendor"), a["id"].as_str().unwrap(), "confirmed").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = book(&state, "cust-b", &bike_id, day(11), day(13)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "dates unavailable");
    assert_eq!(json["retryable"], true);

    let (status, _) = book(&state, "cust-b", &bike_id, day(12), day(14)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, c) = book(&state, "cust-b", &bike_id, day(13), day(15)).await;
    assert_eq!(status, StatusCode::CREATED, "{c}");
    assert_eq!(c["status"], "pending");
    assert_eq!(dec(&c["total_amount"]), Decimal::new(1180, 0));
}

#[tokio::test]
async fn test_past_and_inverted_dates_rejected() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;

    let (status, _) = book(&state, "cust-1", &bike_id, day(-1), day(2)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = book(&state, "cust-1", &bike_id, day(5), day(5)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = book(&state, "cust-1", &bike_id, day(6), day(4)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, page) = send(&state, request("GET", "/api/bookings", Some(("admin-1", "admin")), None)).await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_unknown_bike_is_not_found() {
    let state = test_state();
    let (status, json) = book(&state, "cust-1", "no-such-bike", day(3), day(4)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "bike not found");
}

#[tokio::test]
async fn test_transition_permissions() {
    let (state, sent) = build_state(MockGateway::new());
    let bike_id = create_bike(&state, "vendor-1", "500").await;
    let (_, booking) = book(&state, "cust-1", &bike_id, day(10), day(12)).await;
    let id = booking["id"].as_str().unwrap();

    // Customers cannot confirm.
    let (status, json) = set_status(&state, ("cust-1", "customer"), id, "confirmed").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["retryable"], false);

    // Another vendor cannot touch it.
    let (status, _) = set_status(&state, ("vendor-2", "vendor"), id, "confirmed").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Completing a pending booking skips a step.
    let (status, json) = set_status(&state, ("vendor-1", "vendor"), id, "completed").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "booking cannot be changed to that status now");

    let (status, json) = set_status(&state, ("cust-1", "customer"), id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["status_history"].as_array().unwrap().len(), 2);

    // Terminal.
    let (status, _) = set_status(&state, ("vendor-1", "vendor"), id, "confirmed").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = set_status(&state, ("cust-1", "customer"), id, "archived").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Vendor heard about the request and the cancellation.
    let sent = sent.lock().unwrap();
    let to_vendor: Vec<_> = sent.iter().filter(|(to, _)| to == "vendor-1").collect();
    assert_eq!(to_vendor.len(), 2);
    assert_eq!(to_vendor[1].1, "Booking cancelled");
}

#[tokio::test]
async fn test_cancellation_frees_window() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;
    let (_, first) = book(&state, "cust-1", &bike_id, day(10), day(12)).await;

    let (status, _) = book(&state, "cust-2", &bike_id, day(11), day(13)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    set_status(&state, ("cust-1", "customer"), first["id"].as_str().unwrap(), "cancelled").await;

    let (status, _) = book(&state, "cust-2", &bike_id, day(11), day(13)).await;
    assert_eq!(status, StatusCode::CREATED);

    // Reviving the cancelled booking now collides.
    let (status, json) = set_status(&state, ("admin-1", "admin"), first["id"].as_str().unwrap(), "pending").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "dates unavailable");
}

#[tokio::test]
async fn test_late_cancellation_refused() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;
    let (_, booking) = book(&state, "cust-1", &bike_id, day(0), day(2)).await;
    let id = booking["id"].as_str().unwrap();

    let (status, _) = set_status(&state, ("cust-1", "customer"), id, "cancelled").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = set_status(&state, ("admin-1", "admin"), id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);
}

// ── Listing ──

#[tokio::test]
async fn test_listing_scoped_and_filtered() {
    let state = test_state();
    let bike_1 = create_bike(&state, "vendor-1", "500").await;
    let bike_2 = create_bike(&state, "vendor-2", "700").await;
    book(&state, "cust-1", &bike_1, day(3), day(5)).await;
    book(&state, "cust-1", &bike_2, day(3), day(5)).await;
    let (_, other) = book(&state, "cust-2", &bike_1, day(8), day(9)).await;

    let (_, page) = send(&state, request("GET", "/api/bookings", Some(("cust-1", "customer")), None)).await;
    assert_eq!(page["total"], 2);

    let (_, page) = send(&state, request("GET", "/api/bookings?sort=start_date", Some(("vendor-1", "vendor")), None)).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][1]["id"], other["id"]);

    let uri = format!("/api/bookings?bike_id={bike_2}&status%5Bin%5D=pending,confirmed");
    let (_, page) = send(&state, request("GET", &uri, Some(("admin-1", "admin")), None)).await;
    assert_eq!(page["total"], 1);

    let (status, _) = send(
        &state,
        request("GET", "/api/bookings?customer_id%5B%24ne%5D=x", Some(("admin-1", "admin")), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &state,
        request(
            "GET",
            &format!("/api/bookings/{}", other["id"].as_str().unwrap()),
            Some(("cust-1", "customer")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ── Bikes ──

#[tokio::test]
async fn test_bike_maintenance_blocks_bookings() {
    let state = test_state();
    let bike_id = create_bike(&state, "vendor-1", "500").await;

    let (status, json) = send(
        &state,
        request(
            "POST",
            &format!("/api/bikes/{bike_id}/status"),
            Some(("vendor-1", "vendor")),
            Some(json!({ "status": "maintenance" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "maintenance");

    let (status, _) = book(&state, "cust-1", &bike_id, day(3), day(4)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &state,
        request(
            "DELETE",
            &format!("/api/bikes/{bike_id}"),
            Some(("vendor-1", "vendor")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// ── Payments ──

async fn booking_with_order(state: &Arc<AppState>) -> (String, String) {
    let bike_id = create_bike(state, "vendor-1", "100").await;
    let (_, booking) = book(state, "cust-1", &bike_id, day(10), day(13)).await;
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, order) = send(
        state,
        request(
            "POST",
            &format!("/api/bookings/{id}/payment/order"),
            Some(("cust-1", "customer")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{order}");
    assert_eq!(order["amount_minor"], 35400);
    assert_eq!(order["currency"], "INR");
    assert_eq!(order["key_id"], "rzp_test");

    (id, order["order_id"].as_str().unwrap().to_string())
}

async fn verify(
    state: &Arc<AppState>,
    booking_id: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> (StatusCode, Value) {
    send(
        state,
        request(
            "POST",
            &format!("/api/bookings/{booking_id}/payment/verify"),
            Some(("cust-1", "customer")),
            Some(json!({ "order_id": order_id, "payment_id": payment_id, "signature": signature })),
        ),
    )
    .await
}

#[tokio::test]
async fn test_payment_confirms_booking_once() {
    let (state, sent) = build_state(MockGateway::new());
    let (id, order_id) = booking_with_order(&state).await;
    let before = sent.lock().unwrap().len();

    let sig = checkout_signature(&order_id, "pay_001");
    let (status, first) = verify(&state, &id, &order_id, "pay_001", &sig).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["status"], "confirmed");
    assert_eq!(first["payment_status"], "paid");
    assert_eq!(first["payment"]["transaction_id"], "pay_001");

    let (status, second) = verify(&state, &id, &order_id, "pay_001", &sig).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);

    let notified = sent.lock().unwrap().len() - before;
    assert_eq!(notified, 1);
}

#[tokio::test]
async fn test_payment_bad_signature() {
    let state = test_state();
    let (id, order_id) = booking_with_order(&state).await;

    let (status, json) = verify(&state, &id, &order_id, "pay_001", "00ff").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "payment could not be verified");

    let (_, booking) = send(
        &state,
        request("GET", &format!("/api/bookings/{id}"), Some(("cust-1", "customer")), None),
    )
    .await;
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["payment_status"], "unpaid");
}

#[tokio::test]
async fn test_payment_amount_mismatch() {
    let gateway = MockGateway {
        amount_minor: Some(100),
        ..MockGateway::new()
    };
    let (state, _) = build_state(gateway);
    let (id, order_id) = booking_with_order(&state).await;

    let sig = checkout_signature(&order_id, "pay_001");
    let (status, json) = verify(&state, &id, &order_id, "pay_001", &sig).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "payment could not be verified");
}

#[tokio::test]
async fn test_payment_webhook() {
    let (state, sent) = build_state(MockGateway::new());
    let (id, order_id) = booking_with_order(&state).await;
    let before = sent.lock().unwrap().len();

    let body = json!({
        "event": "payment.captured",
        "payload": { "payment": { "entity": {
            "id": "pay_hook", "order_id": order_id, "amount": 35400, "currency": "INR", "status": "captured"
        }}}
    })
    .to_string();
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes()).unwrap();

    let webhook = |signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/webhook/payments")
            .header("Content-Type", "application/json")
            .header("x-razorpay-signature", signature)
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (status, _) = send(&state, webhook("bad")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(&state, webhook(&sig)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");

    let (status, _) = send(&state, webhook(&sig)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, booking) = send(
        &state,
        request("GET", &format!("/api/bookings/{id}"), Some(("vendor-1", "vendor")), None),
    )
    .await;
    assert_eq!(booking["status"], "confirmed");
    assert_eq!(booking["payment"]["transaction_id"], "pay_hook");
    assert_eq!(sent.lock().unwrap().len() - before, 1);
}
