//! HTTP surface
//!
//! Identity arrives in the `x-user-id` header, set by the upstream auth proxy.
//! Back-office routes also need `x-user-role: admin`.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{CartItem, Order, OrderStatus, PaymentMethod};
use crate::domain::value_objects::OrderNumber;
use crate::services::checkout::{CheckoutPreview, PlacedOrder};
use crate::services::coupon::AppliedCoupon;
use crate::services::lifecycle::{OrderDetails, OrderPage};
use crate::services::payment::{PaymentCallback, PaymentHandoff, PaymentOutcome};
use crate::services::pricing::Quote;
use crate::services::wallet::WalletStatement;
use crate::services::Commerce;
use crate::store::{OrderFilter, OrderSort};
use crate::CommerceError;

pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub commerce: Commerce,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-commerce"})) }))
        .route("/api/v1/cart", get(view_cart))
        .route("/api/v1/cart/items", post(add_cart_item))
        .route("/api/v1/cart/items/:variant_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout", get(preview_checkout))
        .route("/api/v1/checkout/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/api/v1/checkout/orders", post(place_order))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:order_number", get(get_order))
        .route("/api/v1/orders/:order_number/cancel", post(cancel_order))
        .route("/api/v1/orders/:order_number/return", post(request_return))
        .route("/api/v1/orders/:order_number/payments", post(initiate_payment))
        .route("/api/v1/orders/:order_number/wallet-payment", post(pay_with_wallet))
        .route("/api/v1/payments/callback", post(payment_callback))
        .route("/api/v1/admin/orders", get(admin_list_orders))
        .route("/api/v1/admin/orders/:order_number/status", post(admin_transition))
        .route("/api/v1/wallet", get(get_wallet))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    BadRequest(String),
    Commerce(CommerceError),
}

impl From<CommerceError> for ApiError {
    fn from(e: CommerceError) -> Self {
        Self::Commerce(e)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Commerce(e) => match e {
                CommerceError::EmptyCart
                | CommerceError::InvalidQuantity(_)
                | CommerceError::InvalidAmount(_)
                | CommerceError::MissingReason
                | CommerceError::SignatureMismatch => StatusCode::BAD_REQUEST,
                CommerceError::InvalidCoupon(_) | CommerceError::InvalidAddress => StatusCode::UNPROCESSABLE_ENTITY,
                CommerceError::InsufficientStock { .. }
                | CommerceError::VariantUnavailable
                | CommerceError::IllegalStatusTransition { .. } => StatusCode::CONFLICT,
                CommerceError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                CommerceError::OrderNotFound | CommerceError::PaymentNotFound | CommerceError::CartItemNotFound => {
                    StatusCode::NOT_FOUND
                }
                CommerceError::Gateway(_) | CommerceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::Commerce(e) => match e {
                CommerceError::EmptyCart => "empty_cart",
                CommerceError::InsufficientStock { .. } => "insufficient_stock",
                CommerceError::InsufficientFunds { .. } => "insufficient_funds",
                CommerceError::InvalidCoupon(_) => "invalid_coupon",
                CommerceError::InvalidAddress => "invalid_address",
                CommerceError::IllegalStatusTransition { .. } => "illegal_status_transition",
                CommerceError::InvalidQuantity(_) => "invalid_quantity",
                CommerceError::InvalidAmount(_) => "invalid_amount",
                CommerceError::VariantUnavailable => "variant_unavailable",
                CommerceError::MissingReason => "missing_reason",
                CommerceError::OrderNotFound => "order_not_found",
                CommerceError::CartItemNotFound => "cart_item_not_found",
                CommerceError::PaymentNotFound => "payment_not_found",
                CommerceError::SignatureMismatch => "signature_mismatch",
                CommerceError::Gateway(_) => "gateway_error",
                CommerceError::Storage(_) => "internal_error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Unauthorized => format!("Missing or invalid {} header", USER_HEADER),
            Self::Forbidden => "Administrator role required".to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::Commerce(e) if e.is_user_recoverable() => e.to_string(),
            Self::Commerce(e) => {
                tracing::error!(error = %e, "Request failed");
                "Internal server error".to_string()
            }
        };
        (status, Json(ErrorResponse { code: self.code(), message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Extractors
// =============================================================================

/// Caller identity from the `x-user-id` header
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CurrentUser)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Back-office caller: a valid identity whose `x-user-role` is `admin`
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(id) = CurrentUser::from_request_parts(parts, state).await?;
        let is_admin = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"));
        if !is_admin {
            tracing::warn!(user_id = %id, "Back-office request without admin role");
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(id))
    }
}

/// JSON extractor with validation
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        value.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(ValidatedJson(value))
    }
}

fn order_number(raw: &str) -> ApiResult<OrderNumber> {
    OrderNumber::parse(raw).map_err(|_| ApiError::Commerce(CommerceError::OrderNotFound))
}

/// Empty and `all` mean no filter.
fn status_filter(raw: Option<&str>) -> ApiResult<Option<OrderStatus>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => s.parse::<OrderStatus>().map(Some).map_err(|e| ApiError::BadRequest(e.to_string())),
    }
}

/// Midnight UTC at the start of a `YYYY-MM-DD` day; malformed dates are ignored.
fn day_start(raw: Option<&str>, days_after: u64) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw?.trim(), "%Y-%m-%d").ok()?;
    let date = date.checked_add_days(chrono::Days::new(days_after))?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    #[validate(range(max = 1000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(max = 500))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderHistoryQuery {
    pub page: Option<u32>,
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub page: Option<u32>,
    pub status: Option<String>,
    pub q: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdminTransitionRequest {
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn view_cart(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<Quote>> {
    Ok(Json(s.commerce.cart.view(user).await?))
}

async fn add_cart_item(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(r): ValidatedJson<AddItemRequest>,
) -> ApiResult<(StatusCode, Json<CartItem>)> {
    let item = s.commerce.cart.add_item(user, r.variant_id, r.quantity).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_cart_item(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(variant_id): Path<Uuid>,
    ValidatedJson(r): ValidatedJson<UpdateQuantityRequest>,
) -> ApiResult<Json<CartItem>> {
    Ok(Json(s.commerce.cart.update_quantity(user, variant_id, r.quantity).await?))
}

async fn remove_cart_item(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(variant_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    s.commerce.cart.remove_item(user, variant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn preview_checkout(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<CheckoutPreview>> {
    let state = s.commerce.checkout.pending().get(user);
    Ok(Json(s.commerce.checkout.preview(user, &state).await?))
}

async fn apply_coupon(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(r): ValidatedJson<ApplyCouponRequest>,
) -> ApiResult<Json<AppliedCoupon>> {
    Ok(Json(s.commerce.checkout.apply_coupon(user, &r.code).await?))
}

async fn remove_coupon(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> StatusCode {
    s.commerce.checkout.remove_coupon(user);
    StatusCode::NO_CONTENT
}

async fn place_order(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidatedJson(r): ValidatedJson<PlaceOrderRequest>,
) -> ApiResult<(StatusCode, Json<PlacedOrder>)> {
    let placed = s.commerce.checkout.place_pending_order(user, r.address_id, r.payment_method).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

async fn list_orders(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<OrderHistoryQuery>,
) -> ApiResult<Json<OrderPage>> {
    let status = status_filter(q.status.as_deref())?;
    Ok(Json(s.commerce.orders.history(user, status, q.q.as_deref(), q.page).await?))
}

async fn get_order(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(s.commerce.orders.details(user, &order_number(&number)?).await?))
}

async fn cancel_order(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.commerce.orders.cancel(user, &order_number(&number)?, &r.reason).await?))
}

async fn request_return(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<ReasonRequest>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.commerce.orders.request_return(user, &order_number(&number)?, &r.reason).await?))
}

async fn initiate_payment(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
) -> ApiResult<Json<PaymentHandoff>> {
    Ok(Json(s.commerce.payments.initiate_for(user, &order_number(&number)?).await?))
}

async fn pay_with_wallet(
    State(s): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(number): Path<String>,
) -> ApiResult<Json<Order>> {
    Ok(Json(s.commerce.payments.pay_with_wallet(user, &order_number(&number)?).await?))
}

async fn payment_callback(
    State(s): State<AppState>,
    ValidatedJson(callback): ValidatedJson<PaymentCallback>,
) -> ApiResult<Json<PaymentOutcome>> {
    Ok(Json(s.commerce.payments.confirm(&callback).await?))
}

async fn admin_list_orders(
    State(s): State<AppState>,
    AdminUser(_): AdminUser,
    Query(q): Query<AdminOrderQuery>,
) -> ApiResult<Json<OrderPage>> {
    let filter = OrderFilter {
        status: status_filter(q.status.as_deref())?,
        search: q.q.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(str::to_string),
        created_from: day_start(q.date_from.as_deref(), 0),
        created_before: day_start(q.date_to.as_deref(), 1),
        sort: q.sort.as_deref().and_then(OrderSort::from_param).unwrap_or_default(),
        ..Default::default()
    };
    Ok(Json(s.commerce.orders.list(&filter, q.page).await?))
}

async fn admin_transition(
    State(s): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(number): Path<String>,
    ValidatedJson(r): ValidatedJson<AdminTransitionRequest>,
) -> ApiResult<Json<Order>> {
    let number = order_number(&number)?;
    tracing::info!(admin_id = %admin, order_number = %number, to = %r.status, "Admin status change");
    Ok(Json(s.commerce.orders.transition(&number, r.status, r.reason.as_deref()).await?))
}

async fn get_wallet(State(s): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<Json<WalletStatement>> {
    Ok(Json(s.commerce.wallet.statement(user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommerceSettings;
    use crate::services::{SignedCallbackGateway, TracingNotifier};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let commerce = Commerce::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SignedCallbackGateway::new("test-secret")),
            Arc::new(TracingNotifier),
            CommerceSettings::default(),
        );
        router(AppState { commerce })
    }

    /// A router over a store holding one PENDING gateway order.
    async fn shop_with_order() -> (Router, Commerce, Uuid, OrderNumber) {
        use crate::domain::aggregates::{Address, Product, Variant};
        use crate::domain::value_objects::Money;

        let store = Arc::new(MemoryStore::new());
        let product = Product::create("Serving bowl", None, Money::from_major(700));
        let variant = Variant::create(product.id, "Ash", 4);
        store.insert_product(product).await;
        store.insert_variant(variant.clone()).await.unwrap();
        let user = Uuid::new_v4();
        let address = Address {
            id: Uuid::new_v4(),
            user_id: user,
            first_name: "Mira".into(),
            last_name: "Das".into(),
            phone: "9000000001".into(),
            email: "mira@example.com".into(),
            street_address: "4 Hill Street".into(),
            city: "Goa".into(),
            state: "GA".into(),
            pin_code: "403001".into(),
            country: "IN".into(),
            deleted_at: None,
        };
        let address_id = address.id;
        store.insert_address(address).await;

        let commerce = Commerce::new(
            store,
            Arc::new(SignedCallbackGateway::new("test-secret")),
            Arc::new(TracingNotifier),
            CommerceSettings::default(),
        );
        commerce.cart.add_item(user, variant.id, 1).await.unwrap();
        let placed = commerce.checkout.place_pending_order(user, address_id, PaymentMethod::Gateway).await.unwrap();
        let app = router(AppState { commerce: commerce.clone() });
        (app, commerce, user, placed.order.order_number)
    }

    fn get_as(uri: &str, user: Option<Uuid>, role: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
        if let Some(role) = role {
            builder = builder.header(ROLE_HEADER, role);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let response = app().oneshot(Request::builder().uri("/api/v1/cart").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_empty_cart_checkout_maps_to_bad_request() {
        let body = serde_json::json!({"address_id": Uuid::new_v4(), "payment_method": "COD"});
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/checkout/orders")
            .header(USER_HEADER, Uuid::new_v4().to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "empty_cart");
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let request = Request::builder()
            .uri("/api/v1/orders/ORD20250101-ABC123")
            .header(USER_HEADER, Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_body_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/cart/items")
            .header(USER_HEADER, Uuid::new_v4().to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({"variant_id": Uuid::new_v4(), "quantity": 0}).to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_change_needs_admin() {
        let (app, commerce, user, number) = shop_with_order().await;
        let uri = format!("/api/v1/admin/orders/{}/status", number);
        let confirm = |user: Option<Uuid>, role: Option<&str>| {
            let mut builder = Request::builder()
                .method(Method::POST)
                .uri(uri.as_str())
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(user) = user {
                builder = builder.header(USER_HEADER, user.to_string());
            }
            if let Some(role) = role {
                builder = builder.header(ROLE_HEADER, role);
            }
            builder.body(Body::from(serde_json::json!({"status": "CONFIRMED"}).to_string())).unwrap()
        };

        let response = app.clone().oneshot(confirm(None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(confirm(Some(user), Some("customer"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["code"], "forbidden");
        let details = commerce.orders.details(user, &number).await.unwrap();
        assert_eq!(details.order.status(), OrderStatus::Pending);

        let response = app.oneshot(confirm(Some(Uuid::new_v4()), Some("admin"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "CONFIRMED");
    }

    #[tokio::test]
    async fn test_order_listings() {
        let (app, _, user, number) = shop_with_order().await;

        let response = app.clone().oneshot(get_as("/api/v1/orders", Some(user), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["per_page"], 10);
        assert_eq!(page["data"][0]["order_number"], number.as_str());

        let response = app.clone().oneshot(get_as("/api/v1/orders?status=delivered", Some(user), None)).await.unwrap();
        assert_eq!(body_json(response).await["total"], 0);
        let response = app.clone().oneshot(get_as("/api/v1/orders?status=lost", Some(user), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = app.clone().oneshot(get_as("/api/v1/orders", Some(Uuid::new_v4()), None)).await.unwrap();
        assert_eq!(body_json(response).await["total"], 0);

        let response = app.clone().oneshot(get_as("/api/v1/admin/orders", Some(user), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app
            .oneshot(get_as("/api/v1/admin/orders?q=MIRA@&sort=-total_amount&date_from=not-a-date", Some(user), Some("admin")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["total"], 1);
    }

    #[test]
    fn test_day_bounds() {
        let start = day_start(Some("2025-03-09"), 0).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-03-09T00:00:00+00:00");
        let end = day_start(Some("2025-03-09"), 1).unwrap();
        assert_eq!(end.to_rfc3339(), "2025-03-10T00:00:00+00:00");
        assert!(day_start(Some("09/03/2025"), 0).is_none());
        assert!(day_start(None, 0).is_none());
    }

    #[test]
    fn test_systemic_errors_are_opaque() {
        let error = ApiError::Commerce(CommerceError::Gateway("upstream timeout".into()));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "gateway_error");
        let error = ApiError::Commerce(CommerceError::InsufficientFunds {
            required: crate::domain::value_objects::Money::from_major(10),
            available: crate::domain::value_objects::Money::ZERO,
        });
        assert_eq!(error.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(error.code(), "insufficient_funds");
    }
}
