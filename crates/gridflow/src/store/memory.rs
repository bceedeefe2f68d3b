use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    ApiKeyRepository, DataSourceRepository, JobRepository, MetricRepository, RepositoryError,
    RunRepository, Store, SubstationRepository, UserRepository,
};
use crate::domain::{
    ApiKey, DataSource, EtlJob, JobVersion, MetricRecord, PipelineRun, Substation, SubstationRecord, User,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_user_id: u64,
    users: BTreeMap<u64, User>,
    keys: HashMap<Uuid, ApiKey>,
    sources: HashMap<Uuid, DataSource>,
    jobs: HashMap<Uuid, EtlJob>,
    metrics: Vec<MetricRecord>,
    next_substation_id: u64,
    substations: BTreeMap<u64, Substation>,
    runs: BTreeMap<String, PipelineRun>,
}

/// Process-local store guarded by a single mutex, optionally snapshotted to JSON.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, RepositoryError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read(path).map_err(|err| {
            RepositoryError::Snapshot(format!("failed to read {}: {err}", path.display()))
        })?;
        let state: StoreState = serde_json::from_slice(&raw).map_err(|err| {
            RepositoryError::Snapshot(format!("invalid snapshot {}: {err}", path.display()))
        })?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            offline: Arc::default(),
        })
    }

    /// Writes the snapshot through a temporary file so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> Result<(), RepositoryError> {
        let encoded = {
            let guard = self.lock()?;
            serde_json::to_vec_pretty(&*guard)
                .map_err(|err| RepositoryError::Snapshot(err.to_string()))?
        };

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, encoded).map_err(|err| {
            RepositoryError::Snapshot(format!("failed to write {}: {err}", tmp.display()))
        })?;
        std::fs::rename(&tmp, path).map_err(|err| {
            RepositoryError::Snapshot(format!("failed to replace {}: {err}", path.display()))
        })
    }

    /// Simulates an outage: every operation fails until [`Self::set_offline`] is called with `false`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(RepositoryError::Unavailable("store offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store lock poisoned".to_string()))
    }
}

impl UserRepository for InMemoryStore {
    fn insert_user(
        &self,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.users.values().any(|user| user.username == username) {
            return Err(RepositoryError::Conflict);
        }
        guard.next_user_id += 1;
        let user = User {
            id: guard.next_user_id,
            username: username.to_string(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            date_joined: now,
        };
        guard.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn user(&self, id: u64) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    fn user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }
}

impl ApiKeyRepository for InMemoryStore {
    fn insert_key(&self, key: ApiKey) -> Result<ApiKey, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.keys.contains_key(&key.id) || guard.keys.values().any(|k| k.key == key.key) {
            return Err(RepositoryError::Conflict);
        }
        guard.keys.insert(key.id, key.clone());
        Ok(key)
    }

    fn update_key(&self, key: ApiKey) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard.keys.get_mut(&key.id) {
            Some(slot) => {
                *slot = key;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn key(&self, id: Uuid) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(self.lock()?.keys.get(&id).cloned())
    }

    fn key_by_secret(&self, secret: &str) -> Result<Option<ApiKey>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.keys.values().find(|key| key.key == secret).cloned())
    }

    fn keys_for_user(&self, user_id: u64) -> Result<Vec<ApiKey>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .keys
            .values()
            .filter(|key| key.user_id == user_id)
            .cloned()
            .collect())
    }

    fn delete_key(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.keys.remove(&id).is_some())
    }
}

impl DataSourceRepository for InMemoryStore {
    fn insert_source(&self, source: DataSource) -> Result<DataSource, RepositoryError> {
        let mut guard = self.lock()?;
        let wanted = source.name.to_lowercase();
        if guard.sources.contains_key(&source.id)
            || guard
                .sources
                .values()
                .any(|existing| existing.name.to_lowercase() == wanted)
        {
            return Err(RepositoryError::Conflict);
        }
        guard.sources.insert(source.id, source.clone());
        Ok(source)
    }

    fn update_source(&self, source: DataSource) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard.sources.get_mut(&source.id) {
            Some(slot) => {
                *slot = source;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn source(&self, id: Uuid) -> Result<Option<DataSource>, RepositoryError> {
        Ok(self.lock()?.sources.get(&id).cloned())
    }

    fn sources(&self) -> Result<Vec<DataSource>, RepositoryError> {
        Ok(self.lock()?.sources.values().cloned().collect())
    }

    fn delete_source(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.sources.remove(&id).is_none() {
            return Ok(false);
        }
        guard.jobs.retain(|_, job| job.data_source_id != id);
        Ok(true)
    }
}

impl JobRepository for InMemoryStore {
    fn insert_job(&self, job: EtlJob) -> Result<EtlJob, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.jobs.contains_key(&job.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn update_job(&self, job: EtlJob) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn update_job_if(&self, job: EtlJob, expected: JobVersion) -> Result<bool, RepositoryError> {
        let mut guard = self.lock()?;
        let slot = guard.jobs.get_mut(&job.id).ok_or(RepositoryError::NotFound)?;
        if slot.version() != expected {
            return Ok(false);
        }
        *slot = job;
        Ok(true)
    }

    fn job(&self, id: Uuid) -> Result<Option<EtlJob>, RepositoryError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    fn jobs(&self) -> Result<Vec<EtlJob>, RepositoryError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    fn job_count_for_source(&self, source_id: Uuid) -> Result<usize, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .jobs
            .values()
            .filter(|job| job.data_source_id == source_id)
            .count())
    }
}

impl MetricRepository for InMemoryStore {
    fn insert_metric(&self, metric: MetricRecord) -> Result<(), RepositoryError> {
        self.lock()?.metrics.push(metric);
        Ok(())
    }

    fn metrics(&self) -> Result<Vec<MetricRecord>, RepositoryError> {
        Ok(self.lock()?.metrics.clone())
    }

    fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut guard = self.lock()?;
        let before = guard.metrics.len();
        guard.metrics.retain(|metric| metric.timestamp >= cutoff);
        Ok(before - guard.metrics.len())
    }
}

impl SubstationRepository for InMemoryStore {
    fn upsert_substation(&self, record: SubstationRecord) -> Result<u64, RepositoryError> {
        let mut guard = self.lock()?;
        let existing = guard
            .substations
            .values()
            .find(|site| site.record.sitefunctionallocation == record.sitefunctionallocation)
            .map(|site| site.id);

        let id = match existing {
            Some(id) => id,
            None => {
                guard.next_substation_id += 1;
                guard.next_substation_id
            }
        };
        guard.substations.insert(id, Substation { id, record });
        Ok(id)
    }

    fn substation(&self, id: u64) -> Result<Option<Substation>, RepositoryError> {
        Ok(self.lock()?.substations.get(&id).cloned())
    }

    fn substations(&self) -> Result<Vec<Substation>, RepositoryError> {
        Ok(self.lock()?.substations.values().cloned().collect())
    }
}

impl RunRepository for InMemoryStore {
    fn insert_run(&self, run: PipelineRun) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.runs.contains_key(&run.run_key) {
            return Err(RepositoryError::Conflict);
        }
        guard.runs.insert(run.run_key.clone(), run);
        Ok(())
    }

    fn update_run(&self, run: PipelineRun) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        match guard.runs.get_mut(&run.run_key) {
            Some(slot) => {
                *slot = run;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn run(&self, run_key: &str) -> Result<Option<PipelineRun>, RepositoryError> {
        Ok(self.lock()?.runs.get(run_key).cloned())
    }

    fn runs(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        Ok(self.lock()?.runs.values().cloned().collect())
    }
}

impl Store for InMemoryStore {
    fn ping(&self) -> Result<(), RepositoryError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataSourceInput, JsonObject, MetricRecord};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).single().expect("valid time")
    }

    fn source(name: &str) -> DataSource {
        DataSource::create(
            DataSourceInput {
                name: Some(name.to_string()),
                source_type: Some("file".to_string()),
                connection_string: Some("/data/substations.csv".to_string()),
                ..DataSourceInput::default()
            },
            now(),
        )
        .expect("valid source")
    }

    #[test]
    fn conditional_job_update_rejects_a_moved_on_record() {
        let store = InMemoryStore::new();
        let job = store
            .insert_job(EtlJob::new("a".into(), Uuid::new_v4(), JsonObject::new(), now()))
            .expect("insert job");
        let pending = job.version();

        let mut cancelled = job.clone();
        cancelled.cancel(now()).expect("pending jobs cancel");
        assert!(store.update_job_if(cancelled, pending).expect("write"));

        let mut started = job.clone();
        started.start(now());
        assert!(!store.update_job_if(started, pending).expect("write"));
        let stored = store.job(job.id).expect("read").expect("exists");
        assert_eq!(stored.status, crate::domain::JobStatus::Cancelled);

        let mut missing = job;
        missing.id = Uuid::new_v4();
        assert!(matches!(
            store.update_job_if(missing, pending),
            Err(RepositoryError::NotFound)
        ));
    }

    #[test]
    fn deleting_a_source_cascades_to_jobs() {
        let store = InMemoryStore::new();
        let kept = store.insert_source(source("kept")).expect("insert");
        let doomed = store.insert_source(source("doomed")).expect("insert");
        store
            .insert_job(EtlJob::new("a".into(), kept.id, JsonObject::new(), now()))
            .expect("insert job");
        store
            .insert_job(EtlJob::new("b".into(), doomed.id, JsonObject::new(), now()))
            .expect("insert job");

        assert!(store.delete_source(doomed.id).expect("delete"));
        let jobs = store.jobs().expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].data_source_id, kept.id);
    }

    #[test]
    fn source_names_conflict_case_insensitively() {
        let store = InMemoryStore::new();
        store.insert_source(source("UKPN")).expect("insert");
        assert!(matches!(
            store.insert_source(source("ukpn")),
            Err(RepositoryError::Conflict)
        ));
    }

    #[test]
    fn metrics_are_purged_strictly_before_cutoff() {
        let store = InMemoryStore::new();
        let cutoff = now() - Duration::days(30);
        store
            .insert_metric(MetricRecord::counter("old", Default::default(), cutoff - Duration::seconds(1)))
            .expect("insert");
        store
            .insert_metric(MetricRecord::counter("edge", Default::default(), cutoff))
            .expect("insert");

        assert_eq!(store.delete_metrics_before(cutoff).expect("purge"), 1);
        assert_eq!(store.metrics().expect("metrics")[0].metric_name, "edge");
    }

    #[test]
    fn offline_store_fails_ping() {
        let store = InMemoryStore::new();
        store.ping().expect("online");
        store.set_offline(true);
        assert!(matches!(store.ping(), Err(RepositoryError::Unavailable(_))));
    }

    #[test]
    fn snapshot_round_trip_preserves_users_and_sources() {
        let dir = std::env::temp_dir().join(format!("gridflow-store-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("snapshot.json");

        let store = InMemoryStore::new();
        store.insert_user("ops", "ops@example.com", now()).expect("user");
        store.insert_source(source("UKPN")).expect("source");
        store.save(&path).expect("save");

        let restored = InMemoryStore::load(&path).expect("load");
        assert!(restored.user_by_username("ops").expect("lookup").is_some());
        assert_eq!(restored.sources().expect("sources").len(), 1);
        let next = restored.insert_user("analyst", "", now()).expect("user");
        assert_eq!(next.id, 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
