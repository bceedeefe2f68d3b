use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use super::{body, parse_id, parse_query, ApiContext, ApiError};
use crate::domain::{ApiKey, ApiKeyUpdate, NewApiKey, User};
use crate::query::KeyQuery;
use crate::store::Store;

pub(crate) async fn list<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let user = context.authenticate(&headers)?;
    let query = KeyQuery::from_pairs(&parse_query(query)?);
    let keys = query.apply(context.store().keys_for_user(user.id)?);
    let views: Vec<_> = keys.iter().map(|key| key.view(user.clone())).collect();
    Ok((StatusCode::OK, Json(views)).into_response())
}

pub(crate) async fn create<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    payload: Result<Json<NewApiKey>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let user = context.authenticate(&headers)?;
    let key = ApiKey::issue(user.id, body(payload)?, Utc::now())?;
    let key = context.store().insert_key(key)?;
    tracing::info!(key_id = %key.id, user = %user.username, "API key created");
    Ok((StatusCode::CREATED, Json(key.view(user))).into_response())
}

pub(crate) async fn detail<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let user = context.authenticate(&headers)?;
    let key = owned_key(&context, &user, &id)?;
    Ok((StatusCode::OK, Json(key.view(user))).into_response())
}

pub(crate) async fn replace<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<ApiKeyUpdate>, JsonRejection>,
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
    payload: Result<Json<ApiKeyUpdate>, JsonRejection>,
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
    let user = context.authenticate(&headers)?;
    let key = owned_key(&context, &user, &id)?;
    context.store().delete_key(key.id)?;
    tracing::info!(key_id = %key.id, "API key deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn update<S>(
    context: &ApiContext<S>,
    headers: &HeaderMap,
    id: &str,
    update: ApiKeyUpdate,
    partial: bool,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    let user = context.authenticate(headers)?;
    let mut key = owned_key(context, &user, id)?;
    key.apply(update, partial, Utc::now())?;
    context.store().update_key(key.clone())?;
    Ok((StatusCode::OK, Json(key.view(user))).into_response())
}

/// Keys belonging to other users are reported as missing.
fn owned_key<S>(context: &ApiContext<S>, user: &User, id: &str) -> Result<ApiKey, ApiError>
where
    S: Store + 'static,
{
    context
        .store()
        .key(parse_id(id)?)?
        .filter(|key| key.user_id == user.id)
        .ok_or(ApiError::NotFound)
}
