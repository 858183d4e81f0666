//! Route handlers.
//!
//! Each handler answers from the request alone, plus metric samples and
//! shipped log records as side effects. None of them fails because logging
//! degraded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::Serialize;

use crate::config::OrdersConfig;
use crate::http::server::AppState;
use crate::observability::metrics::{
    self, MetricSample, MetricsSink, BACKGROUND_JOBS_TOTAL, ORDER_PROCESSING_DURATION,
    TRANSACTION_PROCESSING_TIME,
};
use crate::shipping::{ship_or_fallback, LogRecord};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Source of simulated order ids.
pub type OrderIdSource = Arc<dyn Fn() -> u32 + Send + Sync>;

/// Order handling simulation: even ids succeed, odd ids fail.
#[derive(Clone)]
pub struct OrderSimulation {
    pub success_latency: Duration,
    pub failure_latency: Duration,
    order_ids: OrderIdSource,
}

impl OrderSimulation {
    pub fn from_config(config: &OrdersConfig) -> Self {
        Self {
            success_latency: config.success_latency,
            failure_latency: config.failure_latency,
            order_ids: Arc::new(|| rand::thread_rng().gen_range(0..1000)),
        }
    }

    pub fn with_order_ids(mut self, order_ids: OrderIdSource) -> Self {
        self.order_ids = order_ids;
        self
    }

    fn next_order_id(&self) -> u32 {
        (self.order_ids)()
    }
}

impl std::fmt::Debug for OrderSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSimulation")
            .field("success_latency", &self.success_latency)
            .field("failure_latency", &self.failure_latency)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct OrderData {
    order_id: u32,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    data: OrderData,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    metrics::record_request(&state.metrics, "GET", "/ping", 200);

    let registry = state.metrics.clone();
    let step_latency = state.job_step_latency;
    let submitted = state.jobs.try_spawn(async move {
        validate_request(step_latency).await;
        registry.record(
            &MetricSample::counter(BACKGROUND_JOBS_TOTAL).with_label("outcome", "completed"),
        );
    });
    if let Err(e) = submitted {
        tracing::debug!(error = %e, "Request validation job not scheduled");
        state
            .metrics
            .record(
                &MetricSample::counter(BACKGROUND_JOBS_TOTAL).with_label("outcome", "rejected"),
            );
    }

    (StatusCode::OK, "pong")
}

/// Auth, stock and payment checks that run after `/ping` has answered.
async fn validate_request(step_latency: Duration) {
    for step in ["auth", "stock", "payment"] {
        tokio::time::sleep(step_latency).await;
        tracing::trace!(step, "Validation step finished");
    }
}

/// `POST /orders`
pub async fn create_order(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let start_time = Instant::now();
    let order_id = state.orders.next_order_id();

    tracing::debug!(order_id, "Serving order");

    let (status, body) = if order_id % 2 == 0 {
        tokio::time::sleep(state.orders.success_latency).await;
        (
            StatusCode::OK,
            OrderResponse {
                data: OrderData { order_id },
                error: None,
            },
        )
    } else {
        tokio::time::sleep(state.orders.failure_latency).await;
        let record = LogRecord::error("failed to connect to inventory service")
            .with("customer_id", "123")
            .with("error", "connection to inventory service disconnected")
            .with("product_id", "product-a")
            .with("product_category", "electronic")
            .with("request_id", request_id(&headers));
        ship_or_fallback(&state.sink, &state.metrics, &record).await;
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            OrderResponse {
                data: OrderData { order_id },
                error: Some(ErrorBody {
                    message: "failure, this is simulated by devs",
                }),
            },
        )
    };

    metrics::record_request(&state.metrics, "POST", "/orders", status.as_u16());
    let elapsed = start_time.elapsed().as_secs_f64();
    state.metrics.record(&MetricSample::observe(ORDER_PROCESSING_DURATION, elapsed));
    state.metrics.record(&MetricSample::observe(TRANSACTION_PROCESSING_TIME, elapsed));

    (status, Json(body)).into_response()
}

/// `GET /internal/orders`: a payment gateway failure that is logged but
/// answered with 200.
pub async fn internal_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let trace_id = headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let record = LogRecord::error("failing validating payment")
        .with("trace_id", trace_id)
        .with("request_id", request_id(&headers))
        .with("customer_id", "customer-1")
        .with("error", "payment gateway not responding, with http status code 502")
        .with("product_id", "product-a")
        .with("order_id", "order-id-sample");
    ship_or_fallback(&state.sink, &state.metrics, &record).await;

    metrics::record_request(&state.metrics, "GET", "/internal/orders", 200);
    (StatusCode::OK, Json(serde_json::json!({ "data": {} })))
}

/// `GET /metrics`
pub async fn metrics_export(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}
