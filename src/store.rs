//! Append-only CSV dataset for one record kind.
//!
//! The file has a mandatory header equal to [`Record::FIELDS`] and one row per
//! record. Every write goes to a temporary file in the dataset's directory
//! which is then renamed over the dataset, so a crash mid-write leaves either
//! the old file or the complete new one.
//!
//! # Files
//!
//! ```text
//! data_dir/
//! ├── crime_log.csv        # the dataset
//! └── crime_log.csv.lock   # advisory single-writer lock
//! ```

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::error::ScrapeError;
use crate::models::{NaturalKey, RawRecord, Record};

/// Exclusive advisory lock on a dataset, released on drop.
#[derive(Debug)]
pub struct DatasetLock {
    file: File,
    path: PathBuf,
}

impl DatasetLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release dataset lock");
        }
    }
}

/// Dataset file for record kind `R`.
#[derive(Debug, Clone)]
pub struct Store<R> {
    path: PathBuf,
    _kind: PhantomData<fn() -> R>,
}

impl<R: Record> Store<R> {
    /// A store for the dataset at `path`. Nothing is read or created until
    /// the first load or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _kind: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Take the single-writer lock. Fails immediately if another process
    /// holds it.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub fn lock(&self) -> Result<DatasetLock, ScrapeError> {
        let path = self.lock_path();
        fs::create_dir_all(self.dir()).map_err(|e| ScrapeError::io(self.dir(), e))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ScrapeError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|e| ScrapeError::io(&path, e))?;
        debug!(lock = %path.display(), "Acquired dataset lock");
        Ok(DatasetLock { file, path })
    }

    /// Open the dataset and check its header. `None` if the file is absent.
    fn open_checked(&self) -> Result<Option<csv::Reader<File>>, ScrapeError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScrapeError::io(&self.path, e)),
        };
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| ScrapeError::corrupt(&self.path, format!("unreadable header: {e}")))?;
        let found: Vec<&str> = headers.iter().collect();
        if found.as_slice() != R::FIELDS {
            return Err(ScrapeError::corrupt(
                &self.path,
                format!("header {:?} does not match expected {:?}", found, R::FIELDS),
            ));
        }
        Ok(Some(reader))
    }

    /// Natural keys of every stored row; empty if the dataset does not exist.
    ///
    /// Each row is validated and its key rendered the same way as for a
    /// freshly extracted record, so `2020-10-12 00:00:00` and `2020-10-12`
    /// in a date key field are the same key.
    ///
    /// # Returns
    ///
    /// The set of keys, or [`ScrapeError::CorruptDataset`] if the header does
    /// not match or any row fails validation.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), kind = R::KIND))]
    pub fn load_keys(&self) -> Result<HashSet<NaturalKey>, ScrapeError> {
        let Some(mut reader) = self.open_checked()? else {
            info!("No dataset yet; starting from an empty key set");
            return Ok(HashSet::new());
        };

        let mut keys = HashSet::new();
        let mut rows = 0usize;
        for (i, result) in reader.records().enumerate() {
            // keys go through the record model so legacy cell formats compare
            // equal to freshly rendered ones
            let key = self.parse_row(i, result)?.natural_key();
            if !keys.insert(key.clone()) {
                warn!(key = %key, row = i + 1, "Dataset already holds a duplicate key");
            }
            rows += 1;
        }

        info!(rows, keys = keys.len(), "Loaded dataset keys");
        Ok(keys)
    }

    /// Every stored row parsed back into a typed record.
    ///
    /// A row that fails validation makes the dataset corrupt; rows are never
    /// dropped here.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), kind = R::KIND))]
    pub fn load_all(&self) -> Result<Vec<R>, ScrapeError> {
        let Some(mut reader) = self.open_checked()? else {
            return Ok(Vec::new());
        };

        let records = reader
            .records()
            .enumerate()
            .map(|(i, result)| self.parse_row(i, result))
            .collect::<Result<Vec<_>, _>>()?;
        info!(rows = records.len(), "Loaded dataset rows");
        Ok(records)
    }

    /// Parse the `i`th data row. Unreadable or invalid rows make the dataset
    /// corrupt.
    fn parse_row(&self, i: usize, result: csv::Result<csv::StringRecord>) -> Result<R, ScrapeError> {
        let corrupt = |reason: String| ScrapeError::corrupt(&self.path, format!("row {}: {reason}", i + 1));
        let row = result.map_err(|e| corrupt(e.to_string()))?;
        let raw = RawRecord::from_stored_row(R::FIELDS.iter().copied(), row.iter());
        R::from_raw(&raw).map_err(|e| corrupt(e.to_string()))
    }

    /// Append `records` in order. Writes the header first if the dataset does
    /// not exist yet. Either every row lands or none does.
    ///
    /// # Arguments
    ///
    /// * `records` - Rows to add, already deduplicated against the dataset
    ///
    /// # Returns
    ///
    /// `Ok(())` once the new file has been renamed over the dataset, or an
    /// [`ScrapeError::Io`] with the dataset untouched.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), kind = R::KIND, count = records.len()))]
    pub fn append(&self, records: &[R]) -> Result<(), ScrapeError> {
        let existed = self.exists();
        let mut tmp = self.temp_file()?;

        if existed {
            let current = fs::read(&self.path).map_err(|e| ScrapeError::io(&self.path, e))?;
            let file = tmp.as_file_mut();
            file.write_all(&current)
                .map_err(|e| ScrapeError::io(&self.path, e))?;
            if current.last().is_some_and(|b| *b != b'\n') {
                file.write_all(b"\n")
                    .map_err(|e| ScrapeError::io(&self.path, e))?;
            }
        }

        self.write_rows(tmp.as_file_mut(), !existed, records)?;
        self.commit(tmp, existed)?;
        info!(created = !existed, "Appended rows");
        Ok(())
    }

    /// Replace the whole dataset with `records`. Only for bootstrap and
    /// explicit migrations.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), kind = R::KIND, count = records.len()))]
    pub fn rewrite(&self, records: &[R]) -> Result<(), ScrapeError> {
        let existed = self.exists();
        let mut tmp = self.temp_file()?;
        self.write_rows(tmp.as_file_mut(), true, records)?;
        self.commit(tmp, existed)?;
        info!("Rewrote dataset");
        Ok(())
    }

    fn temp_file(&self) -> Result<NamedTempFile, ScrapeError> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| ScrapeError::io(&dir, e))?;
        NamedTempFile::new_in(&dir).map_err(|e| ScrapeError::io(&dir, e))
    }

    fn write_rows(&self, out: &mut File, header: bool, records: &[R]) -> Result<(), ScrapeError> {
        let to_err = |e: csv::Error| ScrapeError::io(&self.path, e.into());
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        if header {
            writer.write_record(R::FIELDS).map_err(to_err)?;
        }
        for record in records {
            writer.write_record(record.to_cells()).map_err(to_err)?;
        }
        writer.flush().map_err(|e| ScrapeError::io(&self.path, e))
    }

    fn commit(&self, tmp: NamedTempFile, existed: bool) -> Result<(), ScrapeError> {
        let io_err = |e: io::Error| ScrapeError::io(&self.path, e);
        tmp.as_file().sync_all().map_err(io_err)?;

        // temp files are created 0600; keep whatever the dataset had
        if existed {
            let perms = fs::metadata(&self.path).map_err(io_err)?.permissions();
            fs::set_permissions(tmp.path(), perms).map_err(io_err)?;
        } else {
            set_default_permissions(tmp.path()).map_err(io_err)?;
        }

        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
