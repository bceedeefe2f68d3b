use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::{body, parse_query, ApiContext, ApiError};
use crate::domain::NewMetric;
use crate::query::MetricQuery;
use crate::store::Store;

pub(crate) async fn list<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let query = MetricQuery::from_pairs(&parse_query(query)?)?;
    let metrics = query.apply(context.store().metrics()?);
    Ok((StatusCode::OK, Json(metrics)).into_response())
}

pub(crate) async fn create<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    payload: Result<Json<NewMetric>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let record = body(payload)?.into_record(Utc::now())?;
    tracing::debug!(metric_name = %record.metric_name, "recording metric");
    context.store().insert_metric(record.clone())?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}
