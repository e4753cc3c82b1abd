use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use stockpile_auth::{JwtClaims, PrincipalId, Role};
use stockpile_core::TenantId;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(jwt_secret: &str) -> Self {
        // Build app (same router as prod), but bind to an ephemeral port.
        let app = stockpile_api::app::build_app(jwt_secret.to_string()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(jwt_secret: &str, tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        tenant_id,
        roles,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// The API is intentionally eventual-consistent (command path vs projection
/// update). Poll briefly until the projection catches up.
async fn get_json_eventually(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    ready: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..100 {
        let res = client.get(url).bearer_auth(token).send().await.unwrap();

        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if ready(&body) {
                return body;
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("read model did not become consistent within timeout: {url}");
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let res = client
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(json!({}));
    (status, body)
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_required_for_protected_endpoints() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn tenant_context_is_derived_from_token() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let tenant_id = TenantId::new();
    let token = mint_jwt(jwt_secret, tenant_id, vec![Role::new("admin")]);

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/whoami", srv.base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test(flavor = "multi_thread")]
async fn permission_policy_blocks_cashier_from_stock_adjustments() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;

    let tenant_id = TenantId::new();
    let cashier = mint_jwt(jwt_secret, tenant_id, vec![Role::new("cashier")]);

    let client = reqwest::Client::new();
    let (status, _) = post_json(
        &client,
        &format!("{}/catalog/products", srv.base_url),
        &cashier,
        json!({"sku": "TEE-1", "name": "Tee", "price": 1000}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_retail_flow_from_receipt_to_delivery() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let base = srv.base_url.clone();

    let tenant_id = TenantId::new();
    let token = mint_jwt(jwt_secret, tenant_id, vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    // Warehouse to hold stock.
    let (status, body) = post_json(
        &client,
        &format!("{base}/locations"),
        &token,
        json!({"name": "Central Warehouse", "kind": "warehouse"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let location_id = body["id"].as_str().unwrap().to_string();

    // Catalog product, activated so it can be sold.
    let (status, body) = post_json(
        &client,
        &format!("{base}/catalog/products"),
        &token,
        json!({"sku": "TEE-001", "name": "Plain Tee", "price": 1500}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let product_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &client,
        &format!("{base}/catalog/products/{product_id}/activate"),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Track stock and receive 20 units.
    let (status, body) = post_json(
        &client,
        &format!("{base}/inventory/items"),
        &token,
        json!({"product_id": product_id}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &client,
        &format!("{base}/inventory/items/{item_id}/receive"),
        &token,
        json!({"location_id": location_id, "quantity": 20, "reference": "GRN-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stock = get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"].as_array().is_some_and(|b| !b.is_empty()),
    )
    .await;
    assert_eq!(stock["buckets"][0]["on_hand"], 20);

    // Customer + order with one line.
    let (status, body) = post_json(
        &client,
        &format!("{base}/customers"),
        &token,
        json!({"name": "Jane Doe"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let customer_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &client,
        &format!("{base}/sales"),
        &token,
        json!({"customer_id": customer_id}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["id"].as_str().unwrap().to_string();

    // Wait for the order (and product) to land in the read models the
    // line/confirm handlers consult.
    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["status"] == "draft",
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/catalog/products/{product_id}"),
        &token,
        |body| body["status"] == "active",
    )
    .await;

    let (status, _) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/lines"),
        &token,
        json!({"product_id": product_id, "quantity": 3, "unit_price": 1500}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["lines"].as_array().is_some_and(|l| l.len() == 1),
    )
    .await;

    // Confirm: subtotal 4500, reservation of 3 units.
    let (status, body) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/confirm"),
        &token,
        json!({"location_id": location_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grand_total"], 4500);

    let stock = get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"][0]["reserved"] == 3,
    )
    .await;
    assert_eq!(stock["buckets"][0]["available"], 17);
    assert_eq!(stock["buckets"][0]["on_hand"], 20);

    // Pay in two installments; the second completes payment.
    let (status, body) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/payments"),
        &token,
        json!({"amount": 2000, "method": "cash"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fully_paid"], false);

    let (status, body) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/payments"),
        &token,
        json!({"amount": 2500, "method": "card"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fully_paid"], true);

    // Overpayment on a paid order is rejected.
    let (status, _) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/payments"),
        &token,
        json!({"amount": 1, "method": "cash"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Dispatch: reservation commits, units leave, delivery is scheduled.
    let (status, body) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/dispatch"),
        &token,
        json!({"delivery_address": "1 Main Street"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let delivery_id = body["delivery_id"].as_str().unwrap().to_string();

    let stock = get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"][0]["on_hand"] == 17,
    )
    .await;
    assert_eq!(stock["buckets"][0]["reserved"], 0);

    // Drive the delivery to completion; the order follows.
    let (status, _) = post_json(
        &client,
        &format!("{base}/deliveries/{delivery_id}/start"),
        &token,
        json!({"carrier": "FastShip", "tracking_ref": "T-1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        &client,
        &format!("{base}/deliveries/{delivery_id}/complete"),
        &token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["status"] == "delivered",
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn coupon_discount_applies_at_confirmation() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let base = srv.base_url.clone();

    let tenant_id = TenantId::new();
    let token = mint_jwt(jwt_secret, tenant_id, vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    // Location, active product, stock.
    let (_, body) = post_json(
        &client,
        &format!("{base}/locations"),
        &token,
        json!({"name": "Store", "kind": "store"}),
    )
    .await;
    let location_id = body["id"].as_str().unwrap().to_string();

    let (_, body) = post_json(
        &client,
        &format!("{base}/catalog/products"),
        &token,
        json!({"sku": "MUG-1", "name": "Mug", "price": 1000}),
    )
    .await;
    let product_id = body["id"].as_str().unwrap().to_string();
    post_json(
        &client,
        &format!("{base}/catalog/products/{product_id}/activate"),
        &token,
        json!({}),
    )
    .await;

    let (_, body) = post_json(
        &client,
        &format!("{base}/inventory/items"),
        &token,
        json!({"product_id": product_id}),
    )
    .await;
    let item_id = body["id"].as_str().unwrap().to_string();
    post_json(
        &client,
        &format!("{base}/inventory/items/{item_id}/receive"),
        &token,
        json!({"location_id": location_id, "quantity": 10}),
    )
    .await;

    // 10% off, minimum subtotal 1500.
    let now = Utc::now();
    let (status, _) = post_json(
        &client,
        &format!("{base}/coupons"),
        &token,
        json!({
            "code": "SAVE10",
            "discount_kind": "percent",
            "discount_value": 1000,
            "valid_from": (now - ChronoDuration::days(1)).to_rfc3339(),
            "valid_until": (now + ChronoDuration::days(1)).to_rfc3339(),
            "min_subtotal": 1500,
            "max_redemptions": 10,
            "per_customer_limit": 1,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    get_json_eventually(
        &client,
        &format!("{base}/coupons/SAVE10"),
        &token,
        |body| body["active"] == true,
    )
    .await;

    // Customer + 2-unit order (subtotal 2000).
    let (_, body) = post_json(
        &client,
        &format!("{base}/customers"),
        &token,
        json!({"name": "Sam"}),
    )
    .await;
    let customer_id = body["id"].as_str().unwrap().to_string();

    let (_, body) = post_json(
        &client,
        &format!("{base}/sales"),
        &token,
        json!({"customer_id": customer_id}),
    )
    .await;
    let order_id = body["id"].as_str().unwrap().to_string();

    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["status"] == "draft",
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/catalog/products/{product_id}"),
        &token,
        |body| body["status"] == "active",
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"][0]["on_hand"] == 10,
    )
    .await;

    post_json(
        &client,
        &format!("{base}/sales/{order_id}/lines"),
        &token,
        json!({"product_id": product_id, "quantity": 2, "unit_price": 1000}),
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["lines"].as_array().is_some_and(|l| l.len() == 1),
    )
    .await;

    let (status, body) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/confirm"),
        &token,
        json!({"location_id": location_id, "coupon_code": "SAVE10"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subtotal"], 2000);
    assert_eq!(body["discount"], 200);
    assert_eq!(body["grand_total"], 1800);

    // The redemption is consumed: a second order by the same customer
    // cannot use the coupon again (per-customer limit 1).
    let (_, body) = post_json(
        &client,
        &format!("{base}/sales"),
        &token,
        json!({"customer_id": customer_id}),
    )
    .await;
    let second_order = body["id"].as_str().unwrap().to_string();
    get_json_eventually(
        &client,
        &format!("{base}/sales/{second_order}"),
        &token,
        |body| body["status"] == "draft",
    )
    .await;
    post_json(
        &client,
        &format!("{base}/sales/{second_order}/lines"),
        &token,
        json!({"product_id": product_id, "quantity": 2, "unit_price": 1000}),
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/sales/{second_order}"),
        &token,
        |body| body["lines"].as_array().is_some_and(|l| l.len() == 1),
    )
    .await;

    let (status, _) = post_json(
        &client,
        &format!("{base}/sales/{second_order}/confirm"),
        &token,
        json!({"location_id": location_id, "coupon_code": "SAVE10"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn over_reservation_is_rejected_and_rolled_back() {
    let jwt_secret = "test-secret";
    let srv = TestServer::spawn(jwt_secret).await;
    let base = srv.base_url.clone();

    let tenant_id = TenantId::new();
    let token = mint_jwt(jwt_secret, tenant_id, vec![Role::new("admin")]);
    let client = reqwest::Client::new();

    let (_, body) = post_json(
        &client,
        &format!("{base}/locations"),
        &token,
        json!({"name": "Store", "kind": "store"}),
    )
    .await;
    let location_id = body["id"].as_str().unwrap().to_string();

    let (_, body) = post_json(
        &client,
        &format!("{base}/catalog/products"),
        &token,
        json!({"sku": "CAP-1", "name": "Cap", "price": 900}),
    )
    .await;
    let product_id = body["id"].as_str().unwrap().to_string();
    post_json(
        &client,
        &format!("{base}/catalog/products/{product_id}/activate"),
        &token,
        json!({}),
    )
    .await;

    let (_, body) = post_json(
        &client,
        &format!("{base}/inventory/items"),
        &token,
        json!({"product_id": product_id}),
    )
    .await;
    let item_id = body["id"].as_str().unwrap().to_string();
    post_json(
        &client,
        &format!("{base}/inventory/items/{item_id}/receive"),
        &token,
        json!({"location_id": location_id, "quantity": 2}),
    )
    .await;

    let (_, body) = post_json(
        &client,
        &format!("{base}/customers"),
        &token,
        json!({"name": "Avery"}),
    )
    .await;
    let customer_id = body["id"].as_str().unwrap().to_string();
    let (_, body) = post_json(
        &client,
        &format!("{base}/sales"),
        &token,
        json!({"customer_id": customer_id}),
    )
    .await;
    let order_id = body["id"].as_str().unwrap().to_string();

    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["status"] == "draft",
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/catalog/products/{product_id}"),
        &token,
        |body| body["status"] == "active",
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"][0]["on_hand"] == 2,
    )
    .await;

    // Ask for more than is available.
    post_json(
        &client,
        &format!("{base}/sales/{order_id}/lines"),
        &token,
        json!({"product_id": product_id, "quantity": 3, "unit_price": 900}),
    )
    .await;
    get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["lines"].as_array().is_some_and(|l| l.len() == 1),
    )
    .await;

    let (status, _) = post_json(
        &client,
        &format!("{base}/sales/{order_id}/confirm"),
        &token,
        json!({"location_id": location_id}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // The order is still draft and no reservation is left behind.
    let order = get_json_eventually(
        &client,
        &format!("{base}/sales/{order_id}"),
        &token,
        |body| body["status"] == "draft",
    )
    .await;
    assert_eq!(order["status"], "draft");

    let stock = get_json_eventually(
        &client,
        &format!("{base}/inventory/items/{item_id}"),
        &token,
        |body| body["buckets"][0]["on_hand"] == 2,
    )
    .await;
    assert_eq!(stock["buckets"][0]["reserved"], 0);
}
