use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use super::{body, parse_id, parse_query, ApiContext, ApiError};
use crate::domain::jobs::TransitionError;
use crate::domain::{DataSource, EtlJob, EtlJobView, NewEtlJob, ValidationErrors};
use crate::query::JobQuery;
use crate::store::Store;
use crate::tasks::Task;

pub(crate) async fn list<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let query = JobQuery::from_pairs(&parse_query(query)?)?;
    let sources: HashMap<Uuid, DataSource> = context
        .store()
        .sources()?
        .into_iter()
        .map(|source| (source.id, source))
        .collect();

    let jobs = query.apply(context.store().jobs()?, &sources);
    let views = jobs
        .iter()
        .filter_map(|job| {
            let source = sources.get(&job.data_source_id)?;
            Some(view_with(&context, job, source))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((StatusCode::OK, Json(views)).into_response())
}

pub(crate) async fn create<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    payload: Result<Json<NewEtlJob>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let (name, source_id, configuration) = body(payload)?.validate()?;

    let source = context.store().source(source_id)?.ok_or_else(|| {
        ValidationErrors::single("data_source", "Data source does not exist.")
    })?;
    if !source.is_active {
        return Err(ValidationErrors::single(
            "data_source",
            "Cannot create job for inactive data source.",
        )
        .into());
    }

    let job = context
        .store()
        .insert_job(EtlJob::new(name, source.id, configuration, Utc::now()))?;
    tracing::info!(job_id = %job.id, name = %job.name, "ETL job created");
    context.queue().enqueue(Task::process_job(&job))?;

    let view = view_with(&context, &job, &source)?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
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
    let job = context
        .store()
        .job(parse_id(&id)?)?
        .ok_or(ApiError::NotFound)?;
    Ok((StatusCode::OK, Json(view(&context, &job)?)).into_response())
}

pub(crate) async fn retry<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let job = transition(&context, &id, |job| job.reset_for_retry(Utc::now()))?;
    context.queue().enqueue(Task::process_job(&job))?;
    tracing::info!(job_id = %job.id, attempt = job.attempt, "retrying ETL job");

    Ok((StatusCode::OK, Json(view(&context, &job)?)).into_response())
}

pub(crate) async fn cancel<S>(
    State(context): State<Arc<ApiContext<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
{
    context.authenticate(&headers)?;
    let job = transition(&context, &id, |job| job.cancel(Utc::now()))?;
    tracing::info!(job_id = %job.id, "ETL job cancelled");

    Ok((StatusCode::OK, Json(view(&context, &job)?)).into_response())
}

/// Applies a status change with a conditional write, re-reading the job when
/// the worker moved it on between the read and the write.
fn transition<S, F>(context: &ApiContext<S>, id: &str, change: F) -> Result<EtlJob, ApiError>
where
    S: Store + 'static,
    F: Fn(&mut EtlJob) -> Result<(), TransitionError>,
{
    loop {
        let mut job = find_for_action(context, id)?;
        let seen = job.version();
        change(&mut job)?;
        if context.store().update_job_if(job.clone(), seen)? {
            return Ok(job);
        }
    }
}

/// Job actions answer a missing job with `{"error": ...}` instead of `{"detail": ...}`.
fn find_for_action<S>(context: &ApiContext<S>, id: &str) -> Result<EtlJob, ApiError>
where
    S: Store + 'static,
{
    let id = Uuid::parse_str(id).map_err(|_| ApiError::JobNotFound)?;
    context.store().job(id)?.ok_or(ApiError::JobNotFound)
}

fn view<S>(context: &ApiContext<S>, job: &EtlJob) -> Result<EtlJobView, ApiError>
where
    S: Store + 'static,
{
    let source = context
        .store()
        .source(job.data_source_id)?
        .ok_or(ApiError::NotFound)?;
    view_with(context, job, &source)
}

fn view_with<S>(
    context: &ApiContext<S>,
    job: &EtlJob,
    source: &DataSource,
) -> Result<EtlJobView, ApiError>
where
    S: Store + 'static,
{
    let count = context.store().job_count_for_source(source.id)?;
    Ok(job.view(source.view(count)))
}
