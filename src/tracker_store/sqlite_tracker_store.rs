use super::error::{StoreError, StoreResult};
use super::models::*;
use super::schema::TRACKER_VERSIONED_SCHEMAS;
use super::validation::{parse_status, validate_date_range, validate_new_application};
use super::TrackerStore;
use crate::sqlite_persistence::migrate_to_latest;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::backup::Backup;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_READ_POOL_SIZE: usize = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DATE_FORMAT: &str = "%Y-%m-%d";

const APPLICATION_COLUMNS: &str =
    "id, job_url, company, position, application_date, status, notes, created_at, updated_at";

/// SQLite-backed tracker store.
///
/// All writes go through one connection behind a mutex inside an immediate
/// transaction. Reads are spread round-robin over a pool of read-only
/// connections, which WAL mode lets proceed while a write is in flight.
#[derive(Clone)]
pub struct SqliteTrackerStore {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Vec<Arc<Mutex<Connection>>>,
    read_index: Arc<AtomicUsize>,
}

impl SqliteTrackerStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        Self::with_read_pool(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> StoreResult<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut write_conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        write_conn.busy_timeout(BUSY_TIMEOUT)?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        migrate_to_latest(&mut write_conn, TRACKER_VERSIONED_SCHEMAS, "tracker")
            .map_err(StoreError::Schema)?;

        let application_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM applications", [], |r| r.get(0))
            .unwrap_or(0);
        info!(
            "Opened tracker database at {:?}: {} applications",
            path, application_count
        );

        let mut read_pool = Vec::with_capacity(read_pool_size.max(1));
        for _ in 0..read_pool_size.max(1) {
            let read_conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.busy_timeout(BUSY_TIMEOUT)?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(Self {
            db_path: path.to_path_buf(),
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn read_conn(&self) -> Arc<Mutex<Connection>> {
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    /// Runs `f` inside an immediate transaction on the writer connection.
    fn with_write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.write_conn.lock().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<JobApplication> {
        let date_str: String = row.get("application_date")?;
        let status_str: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(JobApplication {
            id: row.get("id")?,
            job_url: row.get("job_url")?,
            company: row.get("company")?,
            position: row.get("position")?,
            application_date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
                .map_err(|e| conversion_error(4, e))?,
            status: parse_status(&status_str).map_err(|e| conversion_error(5, e))?,
            notes: row.get("notes")?,
            created_at: parse_rfc3339(7, &created_at)?,
            updated_at: parse_rfc3339(8, &updated_at)?,
        })
    }

    fn row_to_status_change(row: &rusqlite::Row) -> rusqlite::Result<StatusChange> {
        let from_status: Option<String> = row.get("from_status")?;
        let to_status: String = row.get("to_status")?;
        let changed_at: String = row.get("changed_at")?;

        Ok(StatusChange {
            id: row.get("id")?,
            application_id: row.get("application_id")?,
            from_status: from_status.as_deref().and_then(ApplicationStatus::parse),
            to_status: parse_status(&to_status).map_err(|e| conversion_error(3, e))?,
            note: row.get("note")?,
            changed_at: parse_rfc3339(5, &changed_at)?,
        })
    }

    fn row_to_health_sample(row: &rusqlite::Row) -> rusqlite::Result<HealthSample> {
        Ok(HealthSample {
            component: row.get("component")?,
            timestamp: from_millis(row.get("timestamp")?),
            passed: row.get("passed")?,
            latency: from_micros(row.get("latency_us")?),
            detail: row.get("detail")?,
            error: row.get("error")?,
        })
    }

    fn row_to_performance_sample(row: &rusqlite::Row) -> rusqlite::Result<PerformanceSample> {
        Ok(PerformanceSample {
            operation: row.get("operation")?,
            timestamp: from_millis(row.get("timestamp")?),
            duration: from_micros(row.get("duration_us")?),
            success: row.get("success")?,
        })
    }

    fn row_to_system_sample(row: &rusqlite::Row) -> rusqlite::Result<SystemSample> {
        Ok(SystemSample {
            metric: row.get("metric")?,
            timestamp: from_millis(row.get("timestamp")?),
            value: row.get("value")?,
        })
    }

    fn row_to_backup(row: &rusqlite::Row) -> rusqlite::Result<BackupRecord> {
        let path: String = row.get("path")?;
        let size_bytes: i64 = row.get("size_bytes")?;
        Ok(BackupRecord {
            id: row.get("id")?,
            timestamp: from_millis(row.get("timestamp")?),
            path: PathBuf::from(path),
            size_bytes: size_bytes.max(0) as u64,
            checksum: row.get("checksum")?,
        })
    }

    fn row_to_error_event(row: &rusqlite::Row) -> rusqlite::Result<ErrorEvent> {
        Ok(ErrorEvent {
            id: row.get("id")?,
            component: row.get("component")?,
            message: row.get("message")?,
            context: row.get("context")?,
            timestamp: from_millis(row.get("timestamp")?),
        })
    }

    fn application_exists(conn: &Connection, id: i64) -> StoreResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM applications WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_rfc3339(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn from_micros(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Unix millis of the instant `age` before now.
fn cutoff_millis(age: Duration) -> i64 {
    let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_sub(age_ms)
}

fn append_note(existing: &str, at: &DateTime<Utc>, note: &str) -> String {
    let entry = format!("[{}] {}", at.format(DATE_FORMAT), note);
    if existing.is_empty() {
        entry
    } else {
        format!("{}\n{}", existing, entry)
    }
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

impl TrackerStore for SqliteTrackerStore {
    fn create_application(&self, app: &NewApplication) -> StoreResult<i64> {
        let app = validate_new_application(app)?;
        let now = Self::format_datetime(&Utc::now());

        let id = self.with_write(|conn| {
            conn.execute(
                "INSERT INTO applications (job_url, company, position, application_date, status, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    app.job_url,
                    app.company,
                    app.position,
                    app.application_date.format(DATE_FORMAT).to_string(),
                    app.status.as_str(),
                    app.notes,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO status_history (application_id, from_status, to_status, note, changed_at)
                 VALUES (?1, NULL, ?2, NULL, ?3)",
                params![id, app.status.as_str(), now],
            )?;
            Ok(id)
        })?;

        debug!(
            "Tracked application {} ({} at {}, {})",
            id, app.position, app.company, app.status
        );
        Ok(id)
    }

    fn get_application(&self, id: i64) -> StoreResult<JobApplication> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM applications WHERE id = ?1", APPLICATION_COLUMNS),
            params![id],
            Self::row_to_application,
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "application",
            id,
        })
    }

    fn update_status(&self, id: i64, new_status: &str, note: Option<String>) -> StoreResult<()> {
        let status = parse_status(new_status)?;
        let note = note
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let now = Utc::now();
        let now_str = Self::format_datetime(&now);

        self.with_write(|conn| {
            let (from_status, notes): (String, String) = conn
                .query_row(
                    "SELECT status, notes FROM applications WHERE id = ?1",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?
                .ok_or(StoreError::NotFound {
                    entity: "application",
                    id,
                })?;

            let notes = match &note {
                Some(note) => append_note(&notes, &now, note),
                None => notes,
            };

            conn.execute(
                "UPDATE applications SET status = ?1, notes = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), notes, now_str, id],
            )?;
            conn.execute(
                "INSERT INTO status_history (application_id, from_status, to_status, note, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, from_status, status.as_str(), note, now_str],
            )?;
            debug!("Application {} moved from {} to {}", id, from_status, status);
            Ok(())
        })
    }

    fn list_applications(&self, filter: &ApplicationFilter) -> StoreResult<Vec<JobApplication>> {
        let mut sql = format!("SELECT {} FROM applications WHERE 1 = 1", APPLICATION_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(range) = &filter.date_range {
            validate_date_range(range)?;
            args.push(range.from.format(DATE_FORMAT).to_string());
            sql.push_str(&format!(" AND application_date >= ?{}", args.len()));
            args.push(range.to.format(DATE_FORMAT).to_string());
            sql.push_str(&format!(" AND application_date <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY application_date DESC, id DESC");

        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let applications = stmt
            .query_map(params_from_iter(args.iter()), Self::row_to_application)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(applications)
    }

    fn status_history(&self, id: i64) -> StoreResult<Vec<StatusChange>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        if !Self::application_exists(&conn, id)? {
            return Err(StoreError::NotFound {
                entity: "application",
                id,
            });
        }
        let mut stmt = conn.prepare(
            "SELECT id, application_id, from_status, to_status, note, changed_at
             FROM status_history WHERE application_id = ?1 ORDER BY id ASC",
        )?;
        let history = stmt
            .query_map(params![id], Self::row_to_status_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(history)
    }

    fn summarize_pipeline(&self) -> StoreResult<PipelineSummary> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM applications GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary = PipelineSummary::default();
        for (status, count) in rows {
            match ApplicationStatus::parse(&status) {
                Some(status) if count > 0 => {
                    summary.counts.insert(status, count as usize);
                }
                Some(_) => {}
                None => warn!("Ignoring {} applications with unknown status '{}'", count, status),
            }
        }
        Ok(summary)
    }

    fn record_health_sample(&self, sample: &HealthSample) -> StoreResult<()> {
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO health_samples (component, timestamp, passed, latency_us, detail, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sample.component,
                    sample.timestamp.timestamp_millis(),
                    sample.passed,
                    micros(sample.latency),
                    sample.detail,
                    sample.error,
                ],
            )?;
            Ok(())
        })
    }

    fn recent_health_samples(&self, limit: usize) -> StoreResult<Vec<HealthSample>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT component, timestamp, passed, latency_us, detail, error
             FROM health_samples ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let samples = stmt
            .query_map(params![limit as i64], Self::row_to_health_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    fn record_performance_sample(&self, sample: &PerformanceSample) -> StoreResult<()> {
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO performance_samples (operation, timestamp, duration_us, success)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sample.operation,
                    sample.timestamp.timestamp_millis(),
                    micros(sample.duration),
                    sample.success,
                ],
            )?;
            Ok(())
        })
    }

    fn performance_samples(
        &self,
        operation: &str,
        window: SampleWindow,
    ) -> StoreResult<Vec<PerformanceSample>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let samples = match window {
            SampleWindow::LastN(n) => {
                let mut stmt = conn.prepare(
                    "SELECT operation, timestamp, duration_us, success FROM (
                         SELECT id, operation, timestamp, duration_us, success
                         FROM performance_samples WHERE operation = ?1
                         ORDER BY timestamp DESC, id DESC LIMIT ?2
                     ) ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![operation, n as i64], Self::row_to_performance_sample)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            SampleWindow::Since(age) => {
                let mut stmt = conn.prepare(
                    "SELECT operation, timestamp, duration_us, success
                     FROM performance_samples WHERE operation = ?1 AND timestamp >= ?2
                     ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(
                        params![operation, cutoff_millis(age)],
                        Self::row_to_performance_sample,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(samples)
    }

    fn operation_names(&self) -> StoreResult<Vec<String>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT operation FROM performance_samples ORDER BY operation")?;
        let names = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn record_system_sample(&self, sample: &SystemSample) -> StoreResult<()> {
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO system_samples (metric, timestamp, value) VALUES (?1, ?2, ?3)",
                params![
                    sample.metric,
                    sample.timestamp.timestamp_millis(),
                    sample.value
                ],
            )?;
            Ok(())
        })
    }

    fn system_samples(
        &self,
        metric: &str,
        window: SampleWindow,
    ) -> StoreResult<Vec<SystemSample>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let samples = match window {
            SampleWindow::LastN(n) => {
                let mut stmt = conn.prepare(
                    "SELECT metric, timestamp, value FROM (
                         SELECT id, metric, timestamp, value
                         FROM system_samples WHERE metric = ?1
                         ORDER BY timestamp DESC, id DESC LIMIT ?2
                     ) ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![metric, n as i64], Self::row_to_system_sample)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            SampleWindow::Since(age) => {
                let mut stmt = conn.prepare(
                    "SELECT metric, timestamp, value
                     FROM system_samples WHERE metric = ?1 AND timestamp >= ?2
                     ORDER BY timestamp ASC, id ASC",
                )?;
                let rows = stmt
                    .query_map(params![metric, cutoff_millis(age)], Self::row_to_system_sample)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(samples)
    }

    fn record_error_event(
        &self,
        component: &str,
        message: &str,
        context: Option<String>,
    ) -> StoreResult<i64> {
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO error_events (component, message, context, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![component, message, context, Utc::now().timestamp_millis()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn error_events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<ErrorEvent>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, component, message, context, timestamp
             FROM error_events WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC",
        )?;
        let events = stmt
            .query_map(params![since.timestamp_millis()], Self::row_to_error_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn record_backup(&self, artifact: &BackupArtifact) -> StoreResult<BackupRecord> {
        let id = self.with_write(|conn| {
            conn.execute(
                "INSERT INTO backups (timestamp, path, size_bytes, checksum) VALUES (?1, ?2, ?3, ?4)",
                params![
                    artifact.timestamp.timestamp_millis(),
                    artifact.path.to_string_lossy().into_owned(),
                    artifact.size_bytes as i64,
                    artifact.checksum,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(BackupRecord {
            id,
            // Stored at millisecond precision
            timestamp: from_millis(artifact.timestamp.timestamp_millis()),
            path: artifact.path.clone(),
            size_bytes: artifact.size_bytes,
            checksum: artifact.checksum.clone(),
        })
    }

    fn list_backups(&self) -> StoreResult<Vec<BackupRecord>> {
        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, path, size_bytes, checksum
             FROM backups ORDER BY timestamp DESC, id DESC",
        )?;
        let backups = stmt
            .query_map([], Self::row_to_backup)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(backups)
    }

    fn delete_backup_record(&self, id: i64) -> StoreResult<()> {
        self.with_write(|conn| {
            let deleted = conn.execute("DELETE FROM backups WHERE id = ?1", params![id])?;
            if deleted == 0 {
                return Err(StoreError::NotFound {
                    entity: "backup",
                    id,
                });
            }
            Ok(())
        })
    }

    fn prune(&self, kind: EntityKind, policy: &RetentionPolicy) -> StoreResult<usize> {
        if policy.is_unbounded() {
            return Ok(0);
        }
        let table = kind.table();

        let removed = self.with_write(|conn| {
            let mut removed = 0;
            if let Some(max_age) = policy.max_age {
                removed += conn.execute(
                    &format!("DELETE FROM {} WHERE timestamp < ?1", table),
                    params![cutoff_millis(max_age)],
                )?;
            }
            if let Some(max_count) = policy.max_count {
                removed += conn.execute(
                    &format!(
                        "DELETE FROM {table} WHERE id NOT IN (
                             SELECT id FROM {table} ORDER BY timestamp DESC, id DESC LIMIT ?1
                         )",
                        table = table
                    ),
                    params![max_count as i64],
                )?;
            }
            Ok(removed)
        })?;

        if removed > 0 {
            info!("Pruned {} rows from {}", removed, table);
        }
        Ok(removed)
    }

    fn ping(&self) -> StoreResult<StoreStats> {
        let start = Instant::now();
        if !self.db_path.exists() {
            return Err(StoreError::Connectivity(format!(
                "Database file not found: {}",
                self.db_path.display()
            )));
        }

        let conn = self.read_conn();
        let conn = conn.lock().unwrap();
        let connectivity = |e: rusqlite::Error| StoreError::Connectivity(e.to_string());

        let one: i64 = conn
            .query_row("SELECT 1", [], |r| r.get(0))
            .map_err(connectivity)?;
        if one != 1 {
            return Err(StoreError::Connectivity(
                "Connectivity check returned an unexpected value".to_string(),
            ));
        }
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                [],
                |r| r.get(0),
            )
            .map_err(connectivity)?;
        let application_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM applications", [], |r| r.get(0))
            .map_err(connectivity)?;

        Ok(StoreStats {
            table_count: table_count as usize,
            application_count: application_count as usize,
            latency: start.elapsed(),
        })
    }

    fn snapshot_to(&self, dest: &Path) -> StoreResult<SnapshotInfo> {
        // Writers wait on the lock; readers keep going against the same pages
        let conn = self.write_conn.lock().unwrap();
        let mut dest_conn = Connection::open(dest)?;
        {
            let backup = Backup::new(&conn, &mut dest_conn)?;
            backup.run_to_completion(-1, Duration::ZERO, None)?;
        }
        drop(conn);
        dest_conn
            .close()
            .map_err(|(_, e)| StoreError::Database(e))?;

        let checksum = sha256_file(dest)?;
        let size_bytes = std::fs::metadata(dest)?.len();
        debug!("Snapshot of {:?} written to {:?}", self.db_path, dest);
        Ok(SnapshotInfo {
            size_bytes,
            checksum,
        })
    }

    fn db_path(&self) -> PathBuf {
        self.db_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, SqliteTrackerStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteTrackerStore::open(dir.path().join("data").join("jobs.db")).unwrap();
        (dir, store)
    }

    fn application(company: &str, date: &str, status: &str) -> NewApplication {
        NewApplication {
            job_url: format!("https://jobs.test/{}", company.to_lowercase()),
            company: company.to_string(),
            position: "Engineer".to_string(),
            application_date: date.to_string(),
            status: status.to_string(),
            notes: None,
        }
    }

    fn perf(operation: &str, ms: u64, success: bool, age: Duration) -> PerformanceSample {
        PerformanceSample {
            operation: operation.to_string(),
            timestamp: Utc::now() - chrono::Duration::from_std(age).unwrap(),
            duration: Duration::from_millis(ms),
            success,
        }
    }

    #[test]
    fn creates_parent_directory_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        {
            let store = SqliteTrackerStore::open(&path).unwrap();
            store
                .create_application(&application("Acme", "2024-01-15", "applied"))
                .unwrap();
        }
        let store = SqliteTrackerStore::open(&path).unwrap();
        assert_eq!(store.ping().unwrap().application_count, 1);
    }

    #[test]
    fn get_application_returns_stored_fields() {
        let (_dir, store) = open_store();
        let mut new = application("Acme", "2024-01-15", "applied");
        new.notes = Some("referral from Sam".to_string());
        let id = store.create_application(&new).unwrap();

        let app = store.get_application(id).unwrap();
        assert_eq!(app.company, "Acme");
        assert_eq!(app.status, ApplicationStatus::Applied);
        assert_eq!(app.notes, "referral from Sam");
        assert_eq!(app.application_date.to_string(), "2024-01-15");
        assert_eq!(app.created_at, app.updated_at);

        assert!(store.get_application(id + 100).unwrap_err().is_not_found());
    }

    #[test]
    fn update_status_appends_note_and_history() {
        let (_dir, store) = open_store();
        let id = store
            .create_application(&application("Acme", "2024-01-15", "applied"))
            .unwrap();

        store
            .update_status(id, "screening", Some("recruiter call booked".to_string()))
            .unwrap();
        store.update_status(id, "interview", None).unwrap();

        let app = store.get_application(id).unwrap();
        assert_eq!(app.status, ApplicationStatus::Interview);
        assert!(app.notes.contains("recruiter call booked"));

        let history = store.status_history(id).unwrap();
        let transitions: Vec<_> = history
            .iter()
            .map(|h| (h.from_status, h.to_status))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (None, ApplicationStatus::Applied),
                (Some(ApplicationStatus::Applied), ApplicationStatus::Screening),
                (Some(ApplicationStatus::Screening), ApplicationStatus::Interview),
            ]
        );
    }

    #[test]
    fn list_filters_by_status_and_date_range() {
        let (_dir, store) = open_store();
        store
            .create_application(&application("Acme", "2024-01-15", "applied"))
            .unwrap();
        store
            .create_application(&application("Globex", "2024-02-01", "interview"))
            .unwrap();
        store
            .create_application(&application("Initech", "2024-03-10", "applied"))
            .unwrap();

        let all = store.list_applications(&ApplicationFilter::default()).unwrap();
        let companies: Vec<_> = all.iter().map(|a| a.company.as_str()).collect();
        assert_eq!(companies, vec!["Initech", "Globex", "Acme"]);

        let applied = store
            .list_applications(&ApplicationFilter {
                status: Some(ApplicationStatus::Applied),
                date_range: None,
            })
            .unwrap();
        assert_eq!(applied.len(), 2);

        let february = store
            .list_applications(&ApplicationFilter {
                status: None,
                date_range: Some(DateRange {
                    from: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                    to: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                }),
            })
            .unwrap();
        assert_eq!(february.len(), 1);
        assert_eq!(february[0].company, "Globex");
    }

    #[test]
    fn pipeline_omits_empty_statuses() {
        let (_dir, store) = open_store();
        assert!(store.summarize_pipeline().unwrap().counts.is_empty());

        store
            .create_application(&application("Acme", "2024-01-15", "applied"))
            .unwrap();
        store
            .create_application(&application("Globex", "2024-01-16", "applied"))
            .unwrap();
        store
            .create_application(&application("Initech", "2024-01-17", "offer"))
            .unwrap();

        let summary = store.summarize_pipeline().unwrap();
        assert_eq!(summary.get(ApplicationStatus::Applied), 2);
        assert_eq!(summary.get(ApplicationStatus::Offer), 1);
        assert_eq!(summary.counts.len(), 2);
    }

    #[test]
    fn performance_window_selects_samples() {
        let (_dir, store) = open_store();
        for (ms, age_secs) in [(10, 7200), (20, 120), (30, 60), (40, 1)] {
            store
                .record_performance_sample(&perf(
                    "api.job_search",
                    ms,
                    true,
                    Duration::from_secs(age_secs),
                ))
                .unwrap();
        }
        store
            .record_performance_sample(&perf("db.query", 5, false, Duration::from_secs(1)))
            .unwrap();

        let last_two = store
            .performance_samples("api.job_search", SampleWindow::LastN(2))
            .unwrap();
        let durations: Vec<_> = last_two.iter().map(|s| s.duration.as_millis()).collect();
        assert_eq!(durations, vec![30, 40]);

        let last_hour = store
            .performance_samples("api.job_search", SampleWindow::Since(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(last_hour.len(), 3);

        assert_eq!(
            store.operation_names().unwrap(),
            vec!["api.job_search".to_string(), "db.query".to_string()]
        );
    }

    #[test]
    fn prune_by_age_and_count() {
        let (_dir, store) = open_store();
        for age_days in [0u64, 1, 2, 40, 100] {
            let mut sample = HealthSample::pass("database", Duration::from_millis(3), "ok");
            sample.timestamp = Utc::now() - chrono::Duration::days(age_days as i64);
            store.record_health_sample(&sample).unwrap();
        }

        let by_age = RetentionPolicy::max_age(Duration::from_secs(30 * 86400));
        assert_eq!(store.prune(EntityKind::HealthSamples, &by_age).unwrap(), 2);
        assert_eq!(store.prune(EntityKind::HealthSamples, &by_age).unwrap(), 0);

        let by_count = RetentionPolicy::max_count(1);
        assert_eq!(store.prune(EntityKind::HealthSamples, &by_count).unwrap(), 2);
        let remaining = store.recent_health_samples(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(Utc::now() - remaining[0].timestamp < chrono::Duration::hours(1));

        assert_eq!(
            store
                .prune(EntityKind::HealthSamples, &RetentionPolicy::default())
                .unwrap(),
            0
        );
    }

    #[test]
    fn backup_records_newest_first() {
        let (dir, store) = open_store();
        for i in 0..3 {
            store
                .record_backup(&BackupArtifact {
                    timestamp: Utc::now() - chrono::Duration::hours(3 - i),
                    path: dir.path().join(format!("b{}.db", i)),
                    size_bytes: 100 + i as u64,
                    checksum: format!("sum{}", i),
                })
                .unwrap();
        }
        let backups = store.list_backups().unwrap();
        let checksums: Vec<_> = backups.iter().map(|b| b.checksum.as_str()).collect();
        assert_eq!(checksums, vec!["sum2", "sum1", "sum0"]);

        store.delete_backup_record(backups[0].id).unwrap();
        assert!(store
            .delete_backup_record(backups[0].id)
            .unwrap_err()
            .is_not_found());
        assert_eq!(store.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn ping_fails_once_file_is_gone() {
        let (_dir, store) = open_store();
        let stats = store.ping().unwrap();
        assert_eq!(stats.table_count, 7);

        std::fs::remove_file(store.db_path()).unwrap();
        assert!(matches!(store.ping(), Err(StoreError::Connectivity(_))));
    }

    #[test]
    fn snapshot_copy_matches_source() {
        let (dir, store) = open_store();
        store
            .create_application(&application("Acme", "2024-01-15", "applied"))
            .unwrap();

        let dest = dir.path().join("copy.db");
        let info = store.snapshot_to(&dest).unwrap();
        assert_eq!(info.checksum, sha256_file(&dest).unwrap());
        assert_eq!(info.size_bytes, std::fs::metadata(&dest).unwrap().len());

        let copy = SqliteTrackerStore::open(&dest).unwrap();
        assert_eq!(copy.summarize_pipeline().unwrap().get(ApplicationStatus::Applied), 1);
    }

    #[test]
    fn snapshot_succeeds_while_a_read_is_open() {
        let (dir, store) = open_store();
        for company in ["Acme", "Globex"] {
            store
                .create_application(&application(company, "2024-01-15", "applied"))
                .unwrap();
        }

        // Keep a read transaction open on a pooled connection for the whole copy
        let reader = store.read_conn();
        let reader = reader.lock().unwrap();
        let mut stmt = reader.prepare("SELECT id FROM applications").unwrap();
        let mut rows = stmt.query([]).unwrap();
        assert!(rows.next().unwrap().is_some());

        let dest = dir.path().join("copy.db");
        store.snapshot_to(&dest).unwrap();
        drop(rows);
        drop(stmt);
        drop(reader);

        let copy = SqliteTrackerStore::open(&dest).unwrap();
        assert_eq!(copy.summarize_pipeline().unwrap().total(), 2);
    }

    #[test]
    fn system_samples_filter_by_metric_and_window() {
        let (_dir, store) = open_store();
        let mut stale = SystemSample::new("system.cpu_percent", 90.0);
        stale.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.record_system_sample(&stale).unwrap();
        for value in [10.0, 20.0, 30.0] {
            store
                .record_system_sample(&SystemSample::new("system.cpu_percent", value))
                .unwrap();
        }
        store
            .record_system_sample(&SystemSample::new("system.memory_percent", 55.0))
            .unwrap();

        let recent = store
            .system_samples("system.cpu_percent", SampleWindow::Since(Duration::from_secs(3600)))
            .unwrap();
        let values: Vec<f64> = recent.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);

        let last = store
            .system_samples("system.cpu_percent", SampleWindow::LastN(2))
            .unwrap();
        assert_eq!(last.iter().map(|s| s.value).collect::<Vec<_>>(), vec![20.0, 30.0]);

        let policy = RetentionPolicy::max_age(Duration::from_secs(3600));
        assert_eq!(store.prune(EntityKind::SystemSamples, &policy).unwrap(), 1);
    }

    #[test]
    fn error_events_are_recorded_and_pruned() {
        let (_dir, store) = open_store();
        store
            .record_error_event("job_search_api", "timed out", Some("health_check".to_string()))
            .unwrap();
        let events = store
            .error_events_since(Utc::now() - chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].context.as_deref(), Some("health_check"));

        let removed = store
            .prune(EntityKind::ErrorEvents, &RetentionPolicy::max_count(0))
            .unwrap();
        assert_eq!(removed, 1);
    }
}
