use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::{body, parse_id, parse_query, ApiContext, ApiError};
use crate::domain::sources::ensure_unique_name;
use crate::domain::{DataSource, DataSourceInput, DataSourceView};
use crate::query::SourceQuery;
use crate::store::{RepositoryError, Store};

pub(crate) async fn list<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let query = SourceQuery::from_pairs(&parse_query(query)?)?;
    let sources = query.apply(context.store().sources()?);
    let views = sources
        .iter()
        .map(|source| view(&context, source))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((StatusCode::OK, Json(views)).into_response())
}

pub(crate) async fn create<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    payload: Result<Json<DataSourceInput>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let source = DataSource::create(body(payload)?, Utc::now())?;
    let existing = context.store().sources()?;
    ensure_unique_name(&source.name, None, &existing)?;

    let source = match context.store().insert_source(source) {
        Ok(source) => source,
        Err(RepositoryError::Conflict) => {
            return Err(duplicate_name());
        }
        Err(err) => return Err(err.into()),
    };
    tracing::info!(source_id = %source.id, name = %source.name, "data source created");
    Ok((StatusCode::CREATED, Json(source.view(0))).into_response())
}

pub(crate) async fn detail<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let source = find(&context, &id)?;
    Ok((StatusCode::OK, Json(view(&context, &source)?)).into_response())
}

pub(crate) async fn replace<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<DataSourceInput>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    update(&context, &headers, &id, body(payload)?, false)
}

pub(crate) async fn patch<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<DataSourceInput>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    update(&context, &headers, &id, body(payload)?, true)
}

pub(crate) async fn remove<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let source = find(&context, &id)?;
    context.store().delete_source(source.id)?;
    tracing::info!(source_id = %source.id, "data source deleted with its jobs");
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn update<S>(
    context: &ApiContext<S>,
    headers: &HeaderMap,
    id: &str,
    input: DataSourceInput,
    partial: bool,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(headers)?;
    let mut source = find(context, id)?;
    if let Some(name) = &input.name {
        let existing = context.store().sources()?;
        ensure_unique_name(name, Some(&source), &existing)?;
    }

    source.apply(input, partial, Utc::now())?;
    context.store().update_source(source.clone())?;
    Ok((StatusCode::OK, Json(view(context, &source)?)).into_response())
}

fn find<S>(context: &ApiContext<S>, id: &str) -> Result<DataSource, ApiError>
where
    S: Store + 'static,
{
    context
        .store()
        .source(parse_id(id)?)?
        .ok_or(ApiError::NotFound)
}

fn view<S>(context: &ApiContext<S>, source: &DataSource) -> Result<DataSourceView, ApiError>
where
    S: Store + 'static,
{
    let count = context.store().job_count_for_source(source.id)?;
    Ok(source.view(count))
}

fn duplicate_name() -> ApiError {
    ApiError::Validation(crate::domain::ValidationErrors::single(
        "name",
        "A data source with this name already exists.",
    ))
}
