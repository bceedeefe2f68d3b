//! JSON API mounted under `/api/v1`.

mod error;
mod jobs;
mod keys;
mod metrics;
mod sources;
mod system;

pub use error::ApiError;

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::domain::User;
use crate::query::QueryPairs;
use crate::store::Store;
use crate::tasks::{Heartbeat, TaskQueue};

/// Shared state behind every API handler.
pub struct ApiContext<S> {
    store: Arc<S>,
    queue: TaskQueue,
    cache: TtlCache,
    heartbeat: Option<Heartbeat>,
    started: Instant,
}

impl<S> ApiContext<S>
where
    S: Store + 'static,
{
    pub fn new(store: Arc<S>, queue: TaskQueue) -> Self {
        Self {
            store,
            queue,
            cache: TtlCache::new(),
            heartbeat: None,
            started: Instant::now(),
        }
    }

    /// Reports worker liveness on `/health/` from this heartbeat.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Resolves the caller from `Authorization: Api-Key <key>` or `X-API-Key`,
    /// stamping the key's `last_used_at`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<User, ApiError> {
        let secret = api_key_from_headers(headers).ok_or(ApiError::MissingCredentials)?;
        let now = Utc::now();

        let mut key = self
            .store
            .key_by_secret(&secret)?
            .filter(|key| key.is_usable(now))
            .ok_or(ApiError::InvalidKey)?;
        let user = self.store.user(key.user_id)?.ok_or(ApiError::InvalidKey)?;

        key.last_used_at = Some(now);
        self.store.update_key(key)?;
        Ok(user)
    }
}

fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let mut parts = value.split_whitespace();
        if let (Some(scheme), Some(key)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("api-key") {
                return Some(key.to_string());
            }
        }
    }

    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn parse_query(raw: Option<String>) -> Result<QueryPairs, ApiError> {
    Ok(QueryPairs::parse(raw.as_deref())?)
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(ApiError::from)
}

/// Router builder for the `/api/v1` surface.
pub fn api_router<S>(context: Arc<ApiContext<S>>) -> Router
where
    S: Store + 'static,
{
    let routes = Router::new()
        .route("/keys/", get(keys::list::<S>).post(keys::create::<S>))
        .route(
            "/keys/:id/",
            get(keys::detail::<S>)
                .put(keys::replace::<S>)
                .patch(keys::patch::<S>)
                .delete(keys::remove::<S>),
        )
        .route(
            "/data-sources/",
            get(sources::list::<S>).post(sources::create::<S>),
        )
        .route(
            "/data-sources/:id/",
            get(sources::detail::<S>)
                .put(sources::replace::<S>)
                .patch(sources::patch::<S>)
                .delete(sources::remove::<S>),
        )
        .route("/etl-jobs/", get(jobs::list::<S>).post(jobs::create::<S>))
        .route("/etl-jobs/:id/", get(jobs::detail::<S>))
        .route("/etl-jobs/:id/retry/", post(jobs::retry::<S>))
        .route("/etl-jobs/:id/cancel/", post(jobs::cancel::<S>))
        .route(
            "/metrics/",
            get(metrics::list::<S>).post(metrics::create::<S>),
        )
        .route("/dashboard/stats/", get(system::dashboard::<S>))
        .route("/health/", get(system::health::<S>))
        .route("/substations/", get(system::substations::<S>))
        .route("/substations/:id/", get(system::substation::<S>))
        .route("/pipelines/runs/", get(system::pipeline_runs::<S>))
        .with_state(context);

    Router::new().nest("/api/v1", routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn api_key_is_read_from_either_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(api_key_from_headers(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Api-Key abc123"));
        assert_eq!(api_key_from_headers(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        headers.insert("x-api-key", HeaderValue::from_static("fallback"));
        assert_eq!(api_key_from_headers(&headers).as_deref(), Some("fallback"));
    }
}
