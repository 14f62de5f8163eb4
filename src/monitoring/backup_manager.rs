use super::system_metrics::available_space;
use crate::tracker_store::{
    sha256_file, BackupArtifact, BackupRecord, RetentionPolicy, StoreError, TrackerStore,
};
use byte_unit::Byte;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backup checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Failed to delete backup {path:?}: {source}")]
    PruneFailed { path: PathBuf, source: io::Error },
}

impl From<StoreError> for BackupError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => BackupError::Io(e),
            other => BackupError::Store(other),
        }
    }
}

/// Outcome of checking a backup file against its recorded checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupVerification {
    Valid,
    Missing,
    Corrupted { actual: String },
}

/// Writes point-in-time copies of the tracker database and enforces their
/// retention.
#[derive(Clone)]
pub struct BackupManager {
    store: Arc<dyn TrackerStore>,
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(store: Arc<dyn TrackerStore>, backup_dir: PathBuf) -> Self {
        Self { store, backup_dir }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn next_backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut path = self.backup_dir.join(format!("jobs_backup_{}.db", stamp));
        let mut n = 1;
        while path.exists() {
            path = self.backup_dir.join(format!("jobs_backup_{}_{}.db", stamp, n));
            n += 1;
        }
        path
    }

    /// Copies the live database into the backup directory and records it.
    /// Fails up front when the destination filesystem lacks room for the
    /// database. The copy is removed again if it no longer hashes to the
    /// checksum the store computed while writing it.
    pub fn backup(&self) -> Result<BackupRecord, BackupError> {
        fs::create_dir_all(&self.backup_dir)?;
        self.ensure_free_space()?;
        let path = self.next_backup_path();
        let timestamp = Utc::now();

        let snapshot = match self.store.snapshot_to(&path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
        };
        let on_disk = match sha256_file(&path) {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
        };
        if on_disk != snapshot.checksum {
            let _ = fs::remove_file(&path);
            return Err(BackupError::ChecksumMismatch {
                expected: snapshot.checksum,
                actual: on_disk,
            });
        }

        let record = self.store.record_backup(&BackupArtifact {
            timestamp,
            path,
            size_bytes: snapshot.size_bytes,
            checksum: snapshot.checksum,
        })?;
        info!(
            "Backup created at {:?} ({:#})",
            record.path,
            Byte::from(record.size_bytes)
        );
        Ok(record)
    }

    fn ensure_free_space(&self) -> Result<(), BackupError> {
        let needed = fs::metadata(self.store.db_path())?.len();
        let Some(available) = available_space(&self.backup_dir) else {
            debug!("No filesystem found for {:?}, skipping space check", self.backup_dir);
            return Ok(());
        };
        if available < needed {
            return Err(BackupError::Io(io::Error::new(
                io::ErrorKind::StorageFull,
                format!(
                    "{:#} free in {:?}, database needs {:#}",
                    Byte::from(available),
                    self.backup_dir,
                    Byte::from(needed)
                ),
            )));
        }
        Ok(())
    }

    /// Deletes backups older than the policy's age and beyond its count,
    /// oldest first. Stops at the first file that cannot be deleted, keeping
    /// its record. Returns the removed records.
    pub fn prune_old_backups(
        &self,
        policy: &RetentionPolicy,
    ) -> Result<Vec<BackupRecord>, BackupError> {
        if policy.is_unbounded() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let backups = self.store.list_backups()?;

        let mut expired: Vec<BackupRecord> = backups
            .into_iter()
            .enumerate()
            .filter(|(index, record)| {
                let too_old = policy.max_age.is_some_and(|max_age| {
                    let age_ms = (now - record.timestamp).num_milliseconds();
                    age_ms > 0 && age_ms as u128 > max_age.as_millis()
                });
                let beyond_count = policy.max_count.is_some_and(|max| *index >= max);
                too_old || beyond_count
            })
            .map(|(_, record)| record)
            .collect();
        expired.reverse();

        let mut removed = Vec::with_capacity(expired.len());
        for record in expired {
            match fs::remove_file(&record.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Backup file {:?} already gone", record.path);
                }
                Err(source) => {
                    return Err(BackupError::PruneFailed {
                        path: record.path,
                        source,
                    })
                }
            }
            self.store.delete_backup_record(record.id)?;
            removed.push(record);
        }

        if !removed.is_empty() {
            info!("Pruned {} old backups", removed.len());
        }
        Ok(removed)
    }

    pub fn verify_backup(&self, record: &BackupRecord) -> Result<BackupVerification, BackupError> {
        match sha256_file(&record.path) {
            Ok(actual) if actual == record.checksum => Ok(BackupVerification::Valid),
            Ok(actual) => Ok(BackupVerification::Corrupted { actual }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BackupVerification::Missing),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_rotatable_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    (name.ends_with(".log") || name.contains(".log.")) && !name.ends_with(".gz")
}

fn gzip_file(path: &Path) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = BufReader::new(File::open(path)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;
    fs::remove_file(path)?;
    Ok(target)
}

/// Gzips log files in `log_dir` last modified more than `max_age` ago.
/// Returns the number of files compressed. A missing directory is not an
/// error.
pub fn rotate_logs(log_dir: &Path, max_age: Duration) -> io::Result<usize> {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return Ok(0);
    };

    let mut rotated = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !is_rotatable_log(&path) {
            continue;
        }
        if entry.metadata()?.modified()? >= cutoff {
            continue;
        }
        match gzip_file(&path) {
            Ok(target) => {
                debug!("Compressed {:?} to {:?}", path, target);
                rotated += 1;
            }
            Err(e) => warn!("Failed to compress log {:?}: {}", path, e),
        }
    }
    if rotated > 0 {
        info!("Compressed {} old log files", rotated);
    }
    Ok(rotated)
}
