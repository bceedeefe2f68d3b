use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::{parse_query, ApiContext, ApiError};
use crate::domain::SubstationRecord;
use crate::query::SubstationQuery;
use crate::store::Store;
use crate::{dashboard, health};

pub(crate) async fn dashboard<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let user = context.authenticate(&headers)?;
    let stats = dashboard::cached(context.store().as_ref(), &context.cache, Utc::now())?;
    tracing::info!(user = %user.username, "dashboard stats requested");
    Ok((StatusCode::OK, Json(stats)).into_response())
}

/// Public; always answers 200 and reports failures in the body.
pub(crate) async fn health<S>(State(context): State<Arc<ApiContext<S>>>) -> Response
where
    S: Store + 'static,
{
    let report = health::check(
        context.store().as_ref(),
        &context.cache,
        context.heartbeat.as_ref(),
        context.started,
        Utc::now(),
    );
    (StatusCode::OK, Json(report)).into_response()
}

pub(crate) async fn substations<S>(
    State(context): State<Arc<ApiContext<S>>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let query = SubstationQuery::from_pairs(&parse_query(query)?);
    let sites: Vec<SubstationRecord> = query
        .apply(context.store().substations()?)
        .into_iter()
        .map(|site| site.record)
        .collect();
    Ok((StatusCode::OK, Json(sites)).into_response())
}

pub(crate) async fn substation<S>(
    State(context): State<Arc<ApiContext<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let id: u64 = id.parse().map_err(|_| ApiError::NotFound)?;
    let site = context.store().substation(id)?.ok_or(ApiError::NotFound)?;
    Ok((StatusCode::OK, Json(site.record)).into_response())
}

pub(crate) async fn pipeline_runs<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let mut runs = context.store().runs()?;
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok((StatusCode::OK, Json(runs)).into_response())
}
