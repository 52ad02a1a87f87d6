//! HTTP handlers for the REST API
//!
//! Intent endpoints only write desired state and queue a job; they answer
//! `202 Accepted` with the job id and never wait for the router.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, instrument};

use crate::controller::{intents, ControllerState};
use crate::error::Error;
use crate::gateway::InterfaceTraffic;
use crate::model::{RouterId, Subscriber, SubscriberId, TenantId};
use crate::queue::JobId;
use crate::scheduler::{self, SweepKind};

use super::dto::{
    ChangePackageRequest, ErrorResponse, HealthResponse, JobAccepted, ProvisionRequest,
    RenewRequest, RenewResponse, SubscriberStatusResponse,
};

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) | Error::ConcurrentUpdate(_) => StatusCode::CONFLICT,
        Error::Inconsistent(_) | Error::ConfigError(_) | Error::ScheduleError { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::RouterUnavailable { .. } | Error::HttpError(_) | Error::RouterApi { .. } => {
            StatusCode::BAD_GATEWAY
        }
        Error::DatabaseError(_) | Error::QueueError(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, Json(ErrorResponse::new(e.kind(), &e.to_string())))
}

fn accepted(job_id: JobId) -> (StatusCode, Json<JobAccepted>) {
    (StatusCode::ACCEPTED, Json(JobAccepted { job_id }))
}

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(state, req), fields(subscriber = %req.id))]
pub async fn provision(
    State(state): State<Arc<ControllerState>>,
    Json(req): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let subscriber: Subscriber = req.into();
    intents::provision(state.store.as_ref(), state.queue.as_ref(), subscriber)
        .await
        .map(accepted)
        .map_err(api_error)
}

#[instrument(skip(state), fields(subscriber = %id))]
pub async fn get_subscriber(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
) -> Result<Json<SubscriberStatusResponse>, ApiError> {
    let id = SubscriberId::from(id);
    match state.store.get_subscriber(&id).await {
        Ok(Some(subscriber)) => Ok(Json(subscriber.into())),
        Ok(None) => Err(api_error(Error::NotFound(format!("subscriber {id}")))),
        Err(e) => Err(api_error(e)),
    }
}

#[instrument(skip(state, req), fields(subscriber = %id))]
pub async fn change_package(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
    Json(req): Json<ChangePackageRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    intents::change_package(
        state.store.as_ref(),
        state.queue.as_ref(),
        &id.into(),
        req.package_id,
    )
    .await
    .map(accepted)
    .map_err(api_error)
}

#[instrument(skip(state), fields(subscriber = %id))]
pub async fn disconnect(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    intents::operator_disconnect(state.store.as_ref(), state.queue.as_ref(), &id.into())
        .await
        .map(accepted)
        .map_err(api_error)
}

#[instrument(skip(state), fields(subscriber = %id))]
pub async fn connect(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    intents::operator_connect(state.store.as_ref(), state.queue.as_ref(), &id.into())
        .await
        .map(accepted)
        .map_err(api_error)
}

#[instrument(skip(state, req), fields(subscriber = %id))]
pub async fn renew(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
    Json(req): Json<RenewRequest>,
) -> Result<Json<RenewResponse>, ApiError> {
    intents::renew_subscription(
        state.store.as_ref(),
        state.queue.as_ref(),
        &id.into(),
        req.expires_at,
    )
    .await
    .map(|outcome| Json(outcome.into()))
    .map_err(api_error)
}

#[instrument(skip(state), fields(subscriber = %id))]
pub async fn request_sync(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    intents::request_sync(state.store.as_ref(), state.queue.as_ref(), &id.into())
        .await
        .map(accepted)
        .map_err(api_error)
}

#[instrument(skip(state), fields(subscriber = %id))]
pub async fn deprovision(
    State(state): State<Arc<ControllerState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    intents::deprovision(state.store.as_ref(), state.queue.as_ref(), &id.into())
        .await
        .map(accepted)
        .map_err(api_error)
}

/// Queue a one-off reconcile or expiry sweep for a tenant
#[instrument(skip(state), fields(tenant = %tenant, kind = %kind))]
pub async fn trigger_sweep(
    State(state): State<Arc<ControllerState>>,
    Path((tenant, kind)): Path<(String, String)>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let kind: SweepKind = kind.parse().map_err(|message: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("invalid_sweep_kind", &message)),
        )
    })?;
    scheduler::enqueue_tenant(state.queue.as_ref(), kind, &TenantId::from(tenant))
        .await
        .map(accepted)
        .map_err(api_error)
}

/// Live traffic sample of one router interface (read-only)
#[instrument(skip(state), fields(router = %router, interface = %interface))]
pub async fn interface_traffic(
    State(state): State<Arc<ControllerState>>,
    Path((router, interface)): Path<(String, String)>,
) -> Result<Json<InterfaceTraffic>, ApiError> {
    let router_id = RouterId::from(router);
    let router = state
        .store
        .get_router(&router_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(Error::NotFound(format!("router {router_id}"))))?;

    let session = state.gateway.open(&router).await.map_err(api_error)?;
    let sample = session.interface_traffic(&interface).await;
    session.close().await;
    sample.map(Json).map_err(api_error)
}
