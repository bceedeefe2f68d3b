//! HTTP behavior of the `/api/v1` surface, driven through the router in memory.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use gridflow::api::{api_router, ApiContext};
use gridflow::domain::{ApiKey, EtlJob, JobStatus, NewApiKey, SubstationRecord};
use gridflow::store::{
    ApiKeyRepository, InMemoryStore, JobRepository, SubstationRepository, UserRepository,
};
use gridflow::tasks::{Task, TaskQueue, TaskReceiver};

struct Harness {
    router: Router,
    store: Arc<InMemoryStore>,
    receiver: TaskReceiver,
    secret: String,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let user = store
        .insert_user("operator", "ops@example.com", Utc::now())
        .expect("user");
    let key = ApiKey::issue(
        user.id,
        NewApiKey {
            name: Some("integration".to_string()),
            ..NewApiKey::default()
        },
        Utc::now(),
    )
    .expect("valid key");
    let secret = key.key.clone();
    store.insert_key(key).expect("key stored");

    let (queue, receiver) = TaskQueue::channel();
    let router = api_router(Arc::new(ApiContext::new(store.clone(), queue)));
    Harness {
        router,
        store,
        receiver,
        secret,
    }
}

impl Harness {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-Key", self.secret.as_str());
        let body = match body {
            Some(payload) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(payload.to_string())
            }
            None => Body::empty(),
        };
        dispatch(&self.router, request.body(body).expect("request")).await
    }

    async fn create_source(&self, name: &str, active: bool) -> Value {
        let (status, payload) = self
            .send(
                "POST",
                "/api/v1/data-sources/",
                Some(json!({
                    "name": name,
                    "source_type": "database",
                    "connection_string": "postgres://warehouse",
                    "is_active": active,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{payload}");
        payload
    }
}

async fn dispatch(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router dispatch");
    let status = response.status();
    let body = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("json")
    };
    (status, payload)
}

#[tokio::test]
async fn requests_without_a_valid_key_are_rejected() {
    let harness = harness();

    let request = Request::get("/api/v1/data-sources/")
        .body(Body::empty())
        .expect("request");
    let (status, payload) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        payload,
        json!({ "detail": "Authentication credentials were not provided." })
    );

    let request = Request::get("/api/v1/data-sources/")
        .header(header::AUTHORIZATION, "Api-Key not-a-real-key")
        .body(Body::empty())
        .expect("request");
    let (status, payload) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(payload, json!({ "detail": "Invalid API key." }));
}

#[tokio::test]
async fn authenticated_requests_stamp_last_used() {
    let harness = harness();
    let request = Request::get("/api/v1/keys/")
        .header(header::AUTHORIZATION, format!("Api-Key {}", harness.secret))
        .body(Body::empty())
        .expect("request");
    let (status, payload) = dispatch(&harness.router, request).await;

    assert_eq!(status, StatusCode::OK);
    let keys = payload.as_array().expect("list");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["user"]["username"], json!("operator"));
    assert!(!keys[0]["last_used_at"].is_null());
}

#[tokio::test]
async fn keys_are_scoped_to_their_owner() {
    let harness = harness();
    let (status, created) = harness
        .send("POST", "/api/v1/keys/", Some(json!({ "name": "reporting" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["key"].as_str().map(str::len), Some(48));

    let (status, errors) = harness
        .send("POST", "/api/v1/keys/", Some(json!({ "name": "ab" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(errors.get("name").is_some());

    let stranger = harness
        .store
        .insert_user("someone-else", "", Utc::now())
        .expect("user");
    let foreign = harness
        .store
        .insert_key(
            ApiKey::issue(
                stranger.id,
                NewApiKey {
                    name: Some("theirs".to_string()),
                    ..NewApiKey::default()
                },
                Utc::now(),
            )
            .expect("key"),
        )
        .expect("stored");
    let (status, payload) = harness
        .send("GET", &format!("/api/v1/keys/{}/", foreign.id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload, json!({ "detail": "Not found." }));

    let id = created["id"].as_str().expect("id");
    let (status, patched) = harness
        .send(
            "PATCH",
            &format!("/api/v1/keys/{id}/"),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["is_active"], json!(false));
    assert_eq!(patched["name"], json!("reporting"));

    let (status, _) = harness
        .send("DELETE", &format!("/api/v1/keys/{id}/"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn data_source_names_are_unique_ignoring_case() {
    let harness = harness();
    let created = harness.create_source("UKPN Feed", true).await;
    assert_eq!(created["etl_jobs_count"], json!(0));
    assert!(created.get("connection_string").is_none());

    let (status, errors) = harness
        .send(
            "POST",
            "/api/v1/data-sources/",
            Some(json!({
                "name": "ukpn feed",
                "source_type": "api",
                "connection_string": "https://example.com",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["name"],
        json!(["A data source with this name already exists."])
    );

    let id = created["id"].as_str().expect("id");
    let (status, renamed) = harness
        .send(
            "PATCH",
            &format!("/api/v1/data-sources/{id}/"),
            Some(json!({ "name": "UKPN FEED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["name"], json!("UKPN FEED"));

    let (status, errors) = harness
        .send(
            "POST",
            "/api/v1/data-sources/",
            Some(json!({ "name": "Broken", "source_type": "ftp" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(errors.get("source_type").is_some());
    assert!(errors.get("connection_string").is_some());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let harness = harness();
    let request = Request::post("/api/v1/data-sources/")
        .header("X-API-Key", harness.secret.as_str())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let (status, payload) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(payload["detail"]
        .as_str()
        .is_some_and(|detail| detail.starts_with("JSON parse error")));
}

#[tokio::test]
async fn creating_a_job_enqueues_processing_once() {
    let mut harness = harness();
    let source = harness.create_source("Warehouse", true).await;

    let (status, job) = harness
        .send(
            "POST",
            "/api/v1/etl-jobs/",
            Some(json!({
                "name": "nightly load",
                "data_source": source["id"],
                "configuration": { "batch_size": 250 },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{job}");
    assert_eq!(job["status"], json!("pending"));
    assert_eq!(job["data_source"]["name"], json!("Warehouse"));

    let id: Uuid = job["id"].as_str().expect("id").parse().expect("uuid");
    assert_eq!(
        harness.receiver.try_recv(),
        Some(Task::ProcessEtlJob { job_id: id, attempt: 0 })
    );
    assert_eq!(harness.receiver.try_recv(), None);
}

#[tokio::test]
async fn jobs_require_an_existing_active_source() {
    let mut harness = harness();
    let inactive = harness.create_source("Dormant", false).await;

    let (status, errors) = harness
        .send(
            "POST",
            "/api/v1/etl-jobs/",
            Some(json!({ "name": "load", "data_source": inactive["id"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["data_source"],
        json!(["Cannot create job for inactive data source."])
    );

    let (status, errors) = harness
        .send(
            "POST",
            "/api/v1/etl-jobs/",
            Some(json!({ "name": "load", "data_source": Uuid::new_v4().to_string() })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(errors["data_source"], json!(["Data source does not exist."]));
    assert_eq!(harness.receiver.try_recv(), None);
}

#[tokio::test]
async fn retry_and_cancel_enforce_job_state() {
    let mut harness = harness();
    let source = harness.create_source("Retry source", true).await;
    let source_id: Uuid = source["id"].as_str().expect("id").parse().expect("uuid");

    let mut completed = EtlJob::new("done".to_string(), source_id, Default::default(), Utc::now());
    completed.start(Utc::now());
    completed.complete(10, Utc::now());
    let completed = harness.store.insert_job(completed).expect("stored");

    let (status, payload) = harness
        .send("POST", &format!("/api/v1/etl-jobs/{}/retry/", completed.id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        payload,
        json!({ "error": "Only failed or cancelled jobs can be retried" })
    );

    let (status, payload) = harness
        .send("POST", &format!("/api/v1/etl-jobs/{}/cancel/", completed.id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        payload,
        json!({ "error": "Only pending or running jobs can be cancelled" })
    );

    let (status, payload) = harness
        .send("POST", &format!("/api/v1/etl-jobs/{}/retry/", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload, json!({ "error": "ETL job not found" }));

    let mut failed = EtlJob::new("flaky".to_string(), source_id, Default::default(), Utc::now());
    failed.start(Utc::now());
    failed.fail("connection reset", Utc::now());
    let failed = harness.store.insert_job(failed).expect("stored");

    let (status, payload) = harness
        .send("POST", &format!("/api/v1/etl-jobs/{}/retry/", failed.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("pending"));
    assert_eq!(payload["error_message"], json!(""));
    assert!(payload["started_at"].is_null());
    assert_eq!(
        harness.receiver.try_recv(),
        Some(Task::ProcessEtlJob { job_id: failed.id, attempt: 1 })
    );

    let (status, payload) = harness
        .send("POST", &format!("/api/v1/etl-jobs/{}/cancel/", failed.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], json!("cancelled"));
    let stored = harness.store.job(failed.id).expect("read").expect("exists");
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn job_listing_filters_by_status() {
    let harness = harness();
    let source = harness.create_source("Filtered", true).await;
    let source_id: Uuid = source["id"].as_str().expect("id").parse().expect("uuid");

    let mut failed = EtlJob::new("broken".to_string(), source_id, Default::default(), Utc::now());
    failed.fail("boom", Utc::now());
    harness.store.insert_job(failed).expect("stored");
    harness
        .store
        .insert_job(EtlJob::new("queued".to_string(), source_id, Default::default(), Utc::now()))
        .expect("stored");

    let (status, payload) = harness
        .send("GET", "/api/v1/etl-jobs/?status=failed", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let jobs = payload.as_array().expect("list");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["name"], json!("broken"));

    let (status, errors) = harness
        .send("GET", "/api/v1/etl-jobs/?status=exploded", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(errors.get("status").is_some());
}

#[tokio::test]
async fn metrics_validate_their_type() {
    let harness = harness();
    let (status, created) = harness
        .send(
            "POST",
            "/api/v1/metrics/",
            Some(json!({ "metric_name": "rows_loaded", "metric_value": 42.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["metric_type"], json!("gauge"));

    let (status, errors) = harness
        .send(
            "POST",
            "/api/v1/metrics/",
            Some(json!({ "metric_name": "x", "metric_value": 1.0, "metric_type": "meter" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["metric_type"],
        json!(["Metric type must be one of: counter, gauge, histogram, summary"])
    );

    let (status, payload) = harness
        .send("GET", "/api/v1/metrics/?metric_name=rows_loaded", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn dashboard_reports_counts() {
    let harness = harness();
    harness.create_source("Dash", true).await;
    let (status, stats) = harness.send("GET", "/api/v1/dashboard/stats/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_data_sources"], json!(1));
    assert_eq!(stats["recent_jobs"], json!([]));
}

#[tokio::test]
async fn health_and_substations_are_public() {
    let harness = harness();
    let id = harness
        .store
        .upsert_substation(SubstationRecord {
            sitefunctionallocation: "EPN-S0000000A1".to_string(),
            licencearea: Some("Eastern Power Networks (EPN)".to_string()),
            sitename: Some("Barking Grid".to_string()),
            sitetype: Some("Grid Substation".to_string()),
            sitevoltage: None,
            esqcroverallrisk: None,
            gridref: None,
            siteassetcount: None,
            powertransformercount: None,
            electricalassetcount: None,
            civilassetcount: None,
            street: None,
            suburb: None,
            towncity: None,
            county: Some("Essex".to_string()),
            postcode: None,
            yearcommissioned: None,
            datecommissioned: None,
            siteclassification: None,
            assessmentdate: None,
            last_report: None,
            calculatedresistance: None,
            measuredresistance_ohm: None,
            next_assessmentdate: None,
            easting: None,
            northing: None,
            transratingwinter: None,
            transratingsummer: None,
            reversepower: None,
            maxdemandsummer: None,
            maxdemandwinter: None,
            spatial_coordinates: None,
            local_authority: None,
            local_authority_code: None,
            what3words: None,
        })
        .expect("stored");

    let request = Request::get("/api/v1/health/")
        .body(Body::empty())
        .expect("request");
    let (status, report) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], json!("healthy"));
    assert_eq!(report["worker"], json!(false));

    let request = Request::get("/api/v1/substations/?county=essex")
        .body(Body::empty())
        .expect("request");
    let (status, sites) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let sites = sites.as_array().expect("list");
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0]["sitename"], json!("Barking Grid"));
    assert!(sites[0].get("id").is_none(), "{:?}", sites[0]);
    let keys = sites[0].as_object().expect("object").len();
    assert_eq!(keys, 35);

    assert_eq!(id, 1);
    let request = Request::get(format!("/api/v1/substations/{id}/"))
        .body(Body::empty())
        .expect("request");
    let (status, site) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(site.get("id").is_none(), "{site:?}");
    assert_eq!(site["sitefunctionallocation"], json!("EPN-S0000000A1"));
    assert_eq!(site, sites[0]);

    let request = Request::get("/api/v1/substations/9999/")
        .body(Body::empty())
        .expect("request");
    let (status, _) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unhealthy_store_is_reported_without_failing_the_request() {
    let harness = harness();
    harness.store.set_offline(true);
    let request = Request::get("/api/v1/health/")
        .body(Body::empty())
        .expect("request");
    let (status, report) = dispatch(&harness.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], json!("unhealthy"));
    assert_eq!(report["database"], json!(false));
}
