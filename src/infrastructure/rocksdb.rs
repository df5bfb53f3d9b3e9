use crate::domain::event::{EventId, PaymentEvent};
use crate::domain::permit::{Application, ApplicationId, ApplicationStatus};
use crate::domain::ports::{ApplicationStore, CommitOutcome, PaymentEventStore, StaleCursor};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Column Family for application rows.
pub const CF_APPLICATIONS: &str = "applications";
/// Column Family for the event log, keyed by append sequence.
pub const CF_EVENTS: &str = "events";
/// Column Family mapping namespaced event ids to their sequence number.
pub const CF_EVENT_IDS: &str = "event_ids";
/// Column Family mapping gateway references to application ids.
pub const CF_REFERENCES: &str = "references";

/// A persistent store implementation using RocksDB.
///
/// Applications and the append-only event log live in separate Column
/// Families. A commit writes the event, its id index and the application
/// update in one `WriteBatch`, so a crash never leaves a transition without
/// its audit record.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
/// Writes hold a std mutex across RocksDB calls, so they run on the
/// blocking pool via `spawn_blocking` rather than on a runtime worker.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_seq: Arc<AtomicU64>,
    /// Serializes the duplicate check with the batch write.
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist and resumes the event
    /// sequence after the last stored event.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_APPLICATIONS, CF_EVENTS, CF_EVENT_IDS, CF_REFERENCES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        let last_seq = {
            let cf = db
                .cf_handle(CF_EVENTS)
                .ok_or_else(|| missing_cf(CF_EVENTS))?;
            match db.iterator_cf(cf, IteratorMode::End).next() {
                Some(item) => {
                    let (key, _) = item?;
                    decode_seq(&key)? + 1
                }
                None => 0,
            }
        };

        Ok(Self {
            db: Arc::new(db),
            next_seq: Arc::new(AtomicU64::new(last_seq)),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| missing_cf(name))
    }

    fn scan<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn lock_commits(&self) -> Result<MutexGuard<'_, ()>> {
        self.commit_lock
            .lock()
            .map_err(|_| PaymentError::InternalError(Box::new(std::io::Error::other("Commit lock poisoned"))))
    }

    fn insert_blocking(&self, application: Application) -> Result<()> {
        let _guard = self.lock_commits()?;

        let cf = self.cf(CF_APPLICATIONS)?;
        if self.db.get_pinned_cf(cf, application.id.0.to_be_bytes())?.is_some() {
            return Err(PaymentError::ApplicationExists(application.id));
        }

        let mut batch = WriteBatch::default();
        self.put_application(&mut batch, &application)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn commit_blocking(&self, event: PaymentEvent, application: Option<Application>) -> Result<CommitOutcome> {
        let _guard = self.lock_commits()?;

        let key = event.event_id.key();
        let ids = self.cf(CF_EVENT_IDS)?;
        if self.db.get_pinned_cf(ids, key.as_bytes())?.is_some() {
            return Ok(CommitOutcome::Duplicate);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst).to_be_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_EVENTS)?, seq, encode(&event)?);
        batch.put_cf(ids, key.as_bytes(), seq);
        if let Some(application) = &application {
            self.put_application(&mut batch, application)?;
        }
        self.db.write(batch)?;

        Ok(CommitOutcome::Recorded)
    }

    fn put_application(&self, batch: &mut WriteBatch, application: &Application) -> Result<()> {
        batch.put_cf(self.cf(CF_APPLICATIONS)?, application.id.0.to_be_bytes(), encode(application)?);
        if let Some(reference) = &application.payment_processor_order_id {
            batch.put_cf(self.cf(CF_REFERENCES)?, reference.as_bytes(), application.id.0.to_be_bytes());
        }
        Ok(())
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PaymentError::InternalError(Box::new(e)))?
}

fn missing_cf(name: &str) -> PaymentError {
    PaymentError::InternalError(Box::new(std::io::Error::other(format!(
        "{} column family not found",
        name
    ))))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        PaymentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        PaymentError::InternalError(Box::new(std::io::Error::other("Corrupt event sequence key")))
    })?;
    Ok(u64::from_be_bytes(raw))
}

#[async_trait]
impl ApplicationStore for RocksDBStore {
    async fn insert(&self, application: Application) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.insert_blocking(application)).await
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>> {
        let cf = self.cf(CF_APPLICATIONS)?;
        match self.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Application>> {
        let cf = self.cf(CF_REFERENCES)?;
        let Some(bytes) = self.db.get_cf(cf, reference.as_bytes())? else {
            return Ok(None);
        };
        let application = self.get(ApplicationId(decode_seq(&bytes)?)).await?;
        // The index keeps old references; only the current attempt matches.
        Ok(application.filter(|a| a.has_reference(reference)))
    }

    async fn stale(
        &self,
        statuses: &[ApplicationStatus],
        updated_before: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: usize,
    ) -> Result<Vec<Application>> {
        let mut matches: Vec<Application> = self
            .scan::<Application>(CF_APPLICATIONS)?
            .into_iter()
            .filter(|a| statuses.contains(&a.status) && a.updated_at < updated_before)
            .filter(|a| after.is_none_or(|cursor| (a.updated_at, a.id) > cursor))
            .collect();
        matches.sort_by_key(|a| (a.updated_at, a.id));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl PaymentEventStore for RocksDBStore {
    async fn exists(&self, event_id: &EventId) -> Result<bool> {
        let cf = self.cf(CF_EVENT_IDS)?;
        Ok(self.db.get_pinned_cf(cf, event_id.key().as_bytes())?.is_some())
    }

    async fn commit(&self, event: PaymentEvent, application: Option<Application>) -> Result<CommitOutcome> {
        let store = self.clone();
        run_blocking(move || store.commit_blocking(event, application)).await
    }

    async fn for_application(&self, id: ApplicationId) -> Result<Vec<PaymentEvent>> {
        Ok(self
            .scan::<PaymentEvent>(CF_EVENTS)?
            .into_iter()
            .filter(|e| e.application_id == Some(id))
            .collect())
    }

    async fn all_events(&self) -> Result<Vec<PaymentEvent>> {
        self.scan(CF_EVENTS)
    }
}
