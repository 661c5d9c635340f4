// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::api::types::*;
use crate::api::ApiState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bridge_db::{Page, DEFAULT_PAGE_LIMIT};
use bridge_indexer::query::{IndexerStats, WithdrawalDetails};
use bridge_relayer::health::HealthStatus;
use bridge_schema::TransactionType;
use prometheus::{Encoder, TextEncoder};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/transactions/:address", get(list_transactions))
        .route("/withdrawals/:key", get(get_withdrawal))
        .with_state(state)
}

/// Unhealthy maps to 503. Without a relayer only the indexer's own
/// reachability (the database read below) decides the status.
async fn health_check(
    State(state): State<Arc<ApiState>>,
) -> Result<(StatusCode, Json<HealthResponse>), ApiErrorResponse> {
    let report = state.health.as_ref().map(|h| h.report());
    let loop_states = state
        .sync
        .as_ref()
        .map(|sync| sync.states())
        .unwrap_or_default();
    let chains = state
        .query
        .get_watermarks()
        .map_err(|e| ApiErrorResponse::internal(&format!("Failed to read watermarks: {}", e)))?
        .into_iter()
        .map(|w| ChainSyncStatus {
            chain: w.chain,
            last_synced_block: w.last_synced_block,
            last_synced_timestamp: w.last_synced_timestamp,
            is_indexing: w.is_indexing,
            state: loop_states
                .iter()
                .find(|(chain, _)| *chain == w.chain)
                .map(|(_, s)| format!("{:?}", s).to_lowercase()),
        })
        .collect();

    let status = report
        .as_ref()
        .map(|r| r.status)
        .unwrap_or(HealthStatus::Healthy);
    let code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok((
        code,
        Json(HealthResponse {
            status,
            chains,
            relayer: report,
        }),
    ))
}

async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiErrorResponse> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| ApiErrorResponse::internal(&format!("Failed to encode metrics: {}", e)))?;
    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

async fn stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<IndexerStats>, ApiErrorResponse> {
    state
        .query
        .get_stats()
        .map(Json)
        .map_err(|e| ApiErrorResponse::internal(&format!("Failed to compute stats: {}", e)))
}

async fn list_transactions(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<TransactionListQuery>,
) -> Result<Json<TransactionListResponse>, ApiErrorResponse> {
    debug!("Listing transactions of {} with {:?}", address, params);
    validate_address(&address).map_err(|e| ApiErrorResponse::bad_request(&e))?;

    let tx_type = params
        .tx_type
        .as_deref()
        .map(|t| {
            TransactionType::from_str(&t.to_lowercase()).map_err(|_| {
                ApiErrorResponse::bad_request(&format!(
                    "Invalid type {}, expected deposit or withdrawal",
                    t
                ))
            })
        })
        .transpose()?;
    let page = Page::new(
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
    );

    let result = match tx_type {
        None => state.query.get_transactions(&address, page),
        Some(TransactionType::Deposit) => state.query.get_deposits(&address, page),
        Some(TransactionType::Withdrawal) => state.query.get_withdrawals(&address, page),
    };
    let paged = result
        .map_err(|e| ApiErrorResponse::internal(&format!("Failed to query transactions: {}", e)))?;
    Ok(Json(TransactionListResponse::new(address, paged)))
}

async fn get_withdrawal(
    State(state): State<Arc<ApiState>>,
    Path(key): Path<String>,
) -> Result<Json<WithdrawalDetails>, ApiErrorResponse> {
    validate_hash(&key).map_err(|e| ApiErrorResponse::bad_request(&e))?;
    state
        .query
        .get_withdrawal(&key.to_lowercase())
        .map_err(|e| ApiErrorResponse::internal(&format!("Failed to query withdrawal: {}", e)))?
        .map(Json)
        .ok_or_else(|| ApiErrorResponse::not_found(&format!("Withdrawal {} not found", key)))
}

fn validate_hex(value: &str, bytes: usize, what: &str) -> Result<(), String> {
    let hex = value
        .strip_prefix("0x")
        .ok_or_else(|| format!("Invalid {} {}: missing 0x prefix", what, value))?;
    if hex.len() != bytes * 2 {
        return Err(format!(
            "Invalid {} {}: expected {} hex characters, got {}",
            what,
            value,
            bytes * 2,
            hex.len()
        ));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("Invalid {} {}: not hex", what, value));
    }
    Ok(())
}

fn validate_address(address: &str) -> Result<(), String> {
    validate_hex(address, 20, "address")
}

fn validate_hash(hash: &str) -> Result<(), String> {
    validate_hex(hash, 32, "hash")
}

/// API error response helper
pub(crate) struct ApiErrorResponse {
    status: StatusCode,
    body: Json<ApiError>,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error: &str, message: &str) -> Self {
        Self {
            status,
            body: Json(ApiError {
                error: error.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn internal(message: &str) -> Self {
        error!("Internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use bridge_db::Db;
    use bridge_indexer::chain_syncer::EventProcessor;
    use bridge_indexer::metrics::IndexerMetrics;
    use bridge_indexer::query::BridgeQuery;
    use bridge_indexer::subscription::EventBus;
    use bridge_relayer::config::HealthConfig;
    use bridge_relayer::health::{HealthMonitor, IndexerConnection};
    use bridge_relayer::retry::SystemClock;
    use bridge_schema::{BridgeEvent, Chain, EventType};
    use prometheus::Registry;
    use tower::ServiceExt;

    const USER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn key(n: u8) -> String {
        format!("0x{}", format!("{:02x}", n).repeat(32))
    }

    fn event(event_type: EventType, key: &str, tx: &str, block: u64) -> BridgeEvent {
        BridgeEvent {
            transaction_hash: tx.to_string(),
            log_index: 0,
            chain: if event_type == EventType::WithdrawalInitiated {
                Chain::L2
            } else {
                Chain::L1
            },
            event_type,
            block_number: block,
            block_hash: format!("0xb{}", block),
            timestamp: 1_700_000_000 + block,
            from_address: USER.to_string(),
            to_address: USER.to_string(),
            token_address: Some("0x7070707070707070707070707070707070707070".to_string()),
            token_id: None,
            amount: Some("42".to_string()),
            correlation_key: key.to_string(),
            data: serde_json::json!({}),
        }
    }

    struct TestApi {
        router: Router,
        health: Arc<HealthMonitor>,
    }

    fn setup() -> TestApi {
        setup_with(true)
    }

    fn setup_with(relayer: bool) -> TestApi {
        let db = Db::in_memory().unwrap();
        let registry = Registry::new();
        let metrics = Arc::new(IndexerMetrics::new(&registry));
        let bus = EventBus::new();
        EventProcessor::new(db.clone(), bus.clone(), metrics)
            .process(vec![
                event(EventType::Erc20DepositInitiated, &key(1), &key(11), 1),
                event(EventType::WithdrawalInitiated, &key(2), &key(12), 2),
                event(EventType::WithdrawalProven, &key(2), &key(13), 3),
            ])
            .unwrap();

        let health = Arc::new(HealthMonitor::new(
            HealthConfig::default(),
            Arc::new(SystemClock),
        ));
        let state = ApiState::new(
            BridgeQuery::new(db, bus),
            relayer.then(|| health.clone()),
            registry,
        );
        TestApi {
            router: create_api_router(state),
            health,
        }
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_validate_hex() {
        assert!(validate_address(USER).is_ok());
        assert!(validate_address("aaaa").unwrap_err().contains("0x prefix"));
        assert!(validate_address("0xaaaa").is_err());
        assert!(validate_hash(&key(1)).is_ok());
        assert!(validate_hash(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn test_api_error_response_not_found() {
        let err = ApiErrorResponse::not_found("Resource not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.0.error, "not_found");
    }

    #[tokio::test]
    async fn test_list_transactions_filters_by_type() {
        let api = setup();
        let (status, body) = get(&api.router, &format!("/transactions/{}", USER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["pagination"]["has_more"], false);

        let (_, body) = get(
            &api.router,
            &format!("/transactions/{}?type=withdrawal&limit=1", USER),
        )
        .await;
        let transactions = body["transactions"].as_array().unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0]["correlation_key"], key(2));
        assert_eq!(transactions[0]["status"], "PROVEN");

        let (status, body) = get(&api.router, &format!("/transactions/{}?type=swap", USER)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        let (status, _) = get(&api.router, "/transactions/not-an-address").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_withdrawal() {
        let api = setup();
        let (status, body) = get(&api.router, &format!("/withdrawals/{}", key(2))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["status"], "PROVEN");
        assert_eq!(body["events"].as_array().unwrap().len(), 2);

        // By initiating tx hash
        let (status, body) = get(&api.router, &format!("/withdrawals/{}", key(12))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["correlation_key"], key(2));

        // Deposits are not served here
        let (status, body) = get(&api.router, &format!("/withdrawals/{}", key(1))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_stats_and_metrics() {
        let api = setup();
        let (status, body) = get(&api.router, "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_events"], 3);
        assert_eq!(body["withdrawals"]["proven"], 1);
        assert_eq!(body["deposits"]["initiated"], 1);

        let response = api
            .router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("bridge_indexer_events_indexed"));
    }

    #[tokio::test]
    async fn test_health_status_code_follows_report() {
        let api = setup();
        // Not started yet
        let (status, body) = get(&api.router, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["chains"].as_array().unwrap().len(), 2);

        api.health.service_started();
        api.health.set_indexer(IndexerConnection::CaughtUp);
        api.health.record_poll_success(std::time::Duration::from_millis(3));
        let (status, body) = get(&api.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["relayer"]["counters"]["polls"], 1);
    }

    #[tokio::test]
    async fn test_health_without_relayer() {
        let api = setup_with(false);
        let (status, body) = get(&api.router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["chains"][0]["chain"], "l1");
        assert!(body.get("relayer").is_none());
    }
}
