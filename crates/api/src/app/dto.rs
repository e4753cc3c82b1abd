use serde::Deserialize;

use stockpile_infra::projections::{
    catalog::ProductReadModel,
    coupons::CouponReadModel,
    deliveries::DeliveryReadModel,
    locations::LocationReadModel,
    parties::PartyReadModel,
    purchase_orders::PurchaseOrderReadModel,
    sales_orders::SalesOrderReadModel,
    serials::SerialReadModel,
    settings::SettingsReadModel,
    stock_levels::StockLevelRow,
    stock_takes::StockTakeReadModel,
    users::UserReadModel,
};
use stockpile_coupons::Discount;
use stockpile_parties::PartyKind;
use stockpile_sales::PaymentMethod;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    /// Price in minor units.
    pub price: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriceRequest {
    pub price: u64,
}

#[derive(Debug, Deserialize)]
pub struct DefineVariantRequest {
    pub name: String,
    pub sku_suffix: String,
    #[serde(default)]
    pub price_delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub name: String,
    /// "warehouse" or "store".
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameLocationRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackProductRequest {
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub location_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub location_id: String,
    pub delta: i64,
    /// recount | damage | loss | correction | stock_take
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TransferStockRequest {
    pub from: String,
    pub to: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReorderPointRequest {
    pub location_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct OpenStockTakeRequest {
    pub location_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordCountRequest {
    pub product_id: String,
    pub counted_qty: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSerialRequest {
    pub serial_no: String,
    pub product_id: String,
    pub location_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReserveSerialRequest {
    pub sales_order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ScrapSerialRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPartyRequest {
    pub name: String,
    pub contact: Option<stockpile_parties::ContactInfo>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePartyRequest {
    pub name: Option<String>,
    pub contact: Option<stockpile_parties::ContactInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
    /// Cost per unit in minor units.
    pub unit_cost: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: String,
    pub location_id: String,
    pub lines: Vec<PurchaseOrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptLineRequest {
    pub line_no: u32,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecordReceiptRequest {
    pub lines: Vec<ReceiptLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSalesOrderRequest {
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SalesOrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
    /// Price per unit in minor units.
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmOrderRequest {
    pub location_id: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    /// Amount in minor units.
    pub amount: u64,
    /// cash | card | transfer | store_credit
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct DispatchOrderRequest {
    pub delivery_address: String,
}

#[derive(Debug, Deserialize)]
pub struct StartDeliveryRequest {
    pub carrier: String,
    pub tracking_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct FailDeliveryRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    /// "percent" or "fixed".
    pub discount_kind: String,
    /// Basis points for percent, minor units for fixed.
    pub discount_value: u64,
    pub valid_from: String,
    pub valid_until: String,
    #[serde(default)]
    pub min_subtotal: u64,
    pub max_redemptions: Option<u32>,
    pub per_customer_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeSettingsRequest {
    pub currency: String,
    #[serde(default)]
    pub low_stock_default: i64,
    #[serde(default)]
    pub allow_backorders: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub low_stock_default: Option<i64>,
    pub allow_backorders: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeCurrencyRequest {
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct SuspendUserRequest {
    pub reason: String,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_payment_method(s: &str) -> Option<PaymentMethod> {
    match s {
        "cash" => Some(PaymentMethod::Cash),
        "card" => Some(PaymentMethod::Card),
        "transfer" => Some(PaymentMethod::Transfer),
        "store_credit" => Some(PaymentMethod::StoreCredit),
        _ => None,
    }
}

pub fn parse_adjustment_reason(s: &str) -> Option<stockpile_inventory::AdjustmentReason> {
    use stockpile_inventory::AdjustmentReason::*;
    match s {
        "recount" => Some(Recount),
        "damage" => Some(Damage),
        "loss" => Some(Loss),
        "correction" => Some(Correction),
        "stock_take" => Some(StockTake),
        _ => None,
    }
}

pub fn parse_location_kind(s: &str) -> Option<stockpile_inventory::LocationKind> {
    match s {
        "warehouse" => Some(stockpile_inventory::LocationKind::Warehouse),
        "store" => Some(stockpile_inventory::LocationKind::Store),
        _ => None,
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn product_to_json(rm: ProductReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.product_id.0.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "price": rm.price.minor(),
        "status": format!("{:?}", rm.status).to_lowercase(),
        "variants": rm.variants.into_iter().map(|v| serde_json::json!({
            "variant_no": v.variant_no,
            "name": v.name,
            "sku_suffix": v.sku_suffix,
            "price_delta": v.price_delta,
        })).collect::<Vec<_>>(),
    })
}

pub fn location_to_json(rm: LocationReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.location_id.0.to_string(),
        "kind": format!("{:?}", rm.kind).to_lowercase(),
        "name": rm.name,
        "closed": rm.closed,
    })
}

pub fn stock_row_to_json(rm: StockLevelRow) -> serde_json::Value {
    serde_json::json!({
        "item_id": rm.item_id.0.to_string(),
        "product_id": rm.product_id.0.to_string(),
        "location_id": rm.location_id.0.to_string(),
        "on_hand": rm.on_hand,
        "reserved": rm.reserved,
        "available": rm.available(),
        "reorder_point": rm.reorder_point,
    })
}

pub fn stock_take_to_json(rm: StockTakeReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.take_id.0.to_string(),
        "location_id": rm.location_id.0.to_string(),
        "status": format!("{:?}", rm.status).to_lowercase(),
        "counts": rm.counts.into_iter().map(|c| serde_json::json!({
            "product_id": c.product_id.0.to_string(),
            "counted_qty": c.counted_qty,
            "expected_qty": c.expected_qty,
        })).collect::<Vec<_>>(),
        "variances": rm.variances.into_iter().map(|v| serde_json::json!({
            "product_id": v.product_id.0.to_string(),
            "delta": v.delta,
        })).collect::<Vec<_>>(),
    })
}

pub fn serial_to_json(rm: SerialReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.unit_id.0.to_string(),
        "serial_no": rm.serial_no,
        "product_id": rm.product_id.0.to_string(),
        "location_id": rm.location_id.0.to_string(),
        "state": rm.state.to_string(),
        "order_ref": rm.order_ref.map(|o| o.to_string()),
    })
}

pub fn party_to_json(rm: PartyReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.party_id.0.to_string(),
        "kind": match rm.kind { PartyKind::Customer => "customer", PartyKind::Supplier => "supplier" },
        "name": rm.name,
        "email": rm.email,
        "phone": rm.phone,
        "status": format!("{:?}", rm.status).to_lowercase(),
    })
}

pub fn purchase_order_to_json(rm: PurchaseOrderReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.order_id.0.to_string(),
        "supplier_id": rm.supplier_id.0.to_string(),
        "location_id": rm.location_id.0.to_string(),
        "status": status_snake(&format!("{:?}", rm.status)),
        "lines": rm.lines.into_iter().map(|l| serde_json::json!({
            "line_no": l.line_no,
            "product_id": l.product_id.0.to_string(),
            "quantity": l.quantity,
            "unit_cost": l.unit_cost.minor(),
            "received": l.received,
            "outstanding": l.outstanding(),
        })).collect::<Vec<_>>(),
    })
}

pub fn sales_order_to_json(rm: SalesOrderReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.order_id.0.to_string(),
        "customer_id": rm.customer_id.0.to_string(),
        "status": format!("{:?}", rm.status).to_lowercase(),
        "location_id": rm.location_id.map(|l| l.0.to_string()),
        "coupon_code": rm.coupon_code,
        "subtotal": rm.subtotal.minor(),
        "discount": rm.discount.minor(),
        "grand_total": rm.grand_total.minor(),
        "paid_total": rm.paid_total.minor(),
        "outstanding": rm.grand_total.saturating_sub(rm.paid_total).minor(),
        "lines": rm.lines.into_iter().map(|l| serde_json::json!({
            "line_no": l.line_no,
            "product_id": l.product_id.0.to_string(),
            "quantity": l.quantity,
            "unit_price": l.unit_price.minor(),
        })).collect::<Vec<_>>(),
    })
}

pub fn delivery_to_json(rm: DeliveryReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.delivery_id.0.to_string(),
        "sales_order_id": rm.sales_order_id.0.to_string(),
        "status": status_snake(&format!("{:?}", rm.status)),
        "address": rm.address,
        "carrier": rm.carrier,
        "tracking_ref": rm.tracking_ref,
        "attempts": rm.attempts,
        "failure_reason": rm.failure_reason,
    })
}

pub fn coupon_to_json(rm: CouponReadModel) -> serde_json::Value {
    let (discount_kind, discount_value) = match rm.terms.discount {
        Discount::Percent(bps) => ("percent", bps as u64),
        Discount::Fixed(amount) => ("fixed", amount.minor()),
    };

    serde_json::json!({
        "id": rm.coupon_id.0.to_string(),
        "code": rm.terms.code,
        "discount_kind": discount_kind,
        "discount_value": discount_value,
        "valid_from": rm.terms.valid_from.to_rfc3339(),
        "valid_until": rm.terms.valid_until.to_rfc3339(),
        "min_subtotal": rm.terms.min_subtotal.minor(),
        "max_redemptions": rm.terms.max_redemptions,
        "per_customer_limit": rm.terms.per_customer_limit,
        "active": rm.active,
        "total_redemptions": rm.total_redemptions,
    })
}

pub fn settings_to_json(rm: SettingsReadModel) -> serde_json::Value {
    serde_json::json!({
        "currency": rm.currency,
        "low_stock_default": rm.low_stock_default,
        "allow_backorders": rm.allow_backorders,
    })
}

pub fn user_to_json(rm: UserReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.user_id.to_string(),
        "email": rm.email,
        "display_name": rm.display_name,
        "roles": rm.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "status": format!("{:?}", rm.status).to_lowercase(),
    })
}

/// Debug-derived CamelCase → snake_case for multi-word statuses.
fn status_snake(debug: &str) -> String {
    let mut out = String::with_capacity(debug.len() + 4);
    for (i, c) in debug.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
