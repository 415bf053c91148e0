// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::api::*;
use crate::engine::Engine;
use crate::errors::EngineError;
use crate::store::{check_record, AppendOutcome, SweepStats};
use crate::telemetry;
use axum::extract::{Request as AxumRequest, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use exposure_kernel::batch::PublishedKeyBatch;
use exposure_kernel::record::EventRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The engine synchronizes internally, so handlers share it without a lock.
pub type SharedEngine = Arc<Engine>;

async fn auth_guard(State(token): State<Arc<Option<String>>>, req: AxumRequest, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = token.as_deref() else {
        return Ok(next.run(req).await);
    };
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

pub fn build_router(state: SharedEngine, auth_token: Option<String>) -> Router {
    let mut app = Router::new()
        .route("/v1/events", post(record_events))
        .route("/v1/batches", post(publish_batch))
        .route("/v1/exposures", get(exposures))
        .route("/v1/matching/run", post(run_matching))
        .route("/v1/maintenance/sweep", post(sweep))
        .route("/v1/store/stats", get(store_stats))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required");
        app = app.layer(from_fn_with_state(Arc::new(Some(token)), auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    app.route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Run blocking engine work off the async workers.
async fn blocking<T, F>(engine: SharedEngine, f: F) -> Result<T, EngineError>
where
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&engine)).await?
}

async fn record_events(
    State(engine): State<SharedEngine>,
    Json(req): Json<RecordEventsRequest>,
) -> Result<Json<RecordEventsResponse>, EngineError> {
    let records: Vec<EventRecord> = req.events.into_iter().map(EventRecord::from).collect();
    // One bad event rejects the whole request before anything is stored.
    for record in &records {
        check_record(record)?;
    }
    let resp = blocking(engine, move |engine| {
        let mut resp = RecordEventsResponse::default();
        for record in &records {
            match engine.record_contact(record)? {
                AppendOutcome::Stored => resp.stored += 1,
                AppendOutcome::Duplicate => resp.duplicates += 1,
            }
        }
        Ok(resp)
    })
    .await?;
    Ok(Json(resp))
}

async fn publish_batch(
    State(engine): State<SharedEngine>,
    Json(req): Json<PublishBatchRequest>,
) -> Result<Json<PublishBatchResponse>, EngineError> {
    let batch = PublishedKeyBatch::try_from(req)?;
    let stats = blocking(engine, move |engine| engine.ingest_batch(&batch)).await?;
    Ok(Json(stats))
}

async fn exposures(State(engine): State<SharedEngine>) -> Json<ExposuresResponse> {
    Json(ExposuresResponse {
        summaries: engine.exposure_summaries(),
    })
}

async fn run_matching(
    State(engine): State<SharedEngine>,
    req: Option<Json<RunMatchingRequest>>,
) -> Result<Json<RunMatchingResponse>, EngineError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let range = req.range()?;

    let cancel = CancellationToken::new();
    // A dropped request (client gone) cancels the pass.
    let _guard = cancel.clone().drop_guard();
    if let Some(ms) = req.timeout_ms {
        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });
    }

    let token = cancel.clone();
    let report = blocking(engine, move |engine| engine.run_matching_pass(range, &token)).await?;
    Ok(Json(report))
}

async fn sweep(State(engine): State<SharedEngine>) -> Result<Json<SweepStats>, EngineError> {
    let stats = blocking(engine, |engine| engine.sweep()).await?;
    Ok(Json(stats))
}

async fn store_stats(State(engine): State<SharedEngine>) -> Result<Json<StoreStatsResponse>, EngineError> {
    let status = blocking(engine, |engine| Ok(engine.status())).await?;
    Ok(Json(status))
}

async fn metrics_handler() -> String {
    telemetry::get_metrics()
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
