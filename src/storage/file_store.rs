use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{Store, StorageError};
use crate::raft::{LogEntry, METHOD_PUT};

struct State {
    log: File,
    data: HashMap<String, String>,
}

/// Append-only JSON-lines log backing an in-memory map.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        log::info!("Store log opened at {:?}", path);

        Ok(Self {
            path,
            state: Mutex::new(State {
                log,
                data: HashMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.data.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn validate(entry: &LogEntry) -> Result<(), StorageError> {
    if entry.key.is_empty() {
        return Err(StorageError::InvalidEntry("empty key".to_string()));
    }
    if entry.method != METHOD_PUT {
        return Err(StorageError::InvalidEntry(format!(
            "unsupported method '{}'",
            entry.method
        )));
    }
    Ok(())
}

impl Store for FileStore {
    fn resolve(&self, entry: &LogEntry) -> Result<String, StorageError> {
        validate(entry)?;

        let mut state = self.lock()?;
        if entry.is_put_log {
            let mut line = serde_json::to_string(entry)?;
            line.push('\n');
            state.log.write_all(line.as_bytes())?;
            state.log.sync_data()?;
        }
        state.data.insert(entry.key.clone(), entry.value.clone());

        Ok(entry.value.clone())
    }

    fn get(&self, key: &str) -> Result<String, StorageError> {
        self.lock()?
            .data
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    fn read_log_command(&self, offset: u64) -> Result<u64, StorageError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut applied = 0;
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let mut entry: LogEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable log line {} in {:?}: {e}", n + 1, self.path);
                    continue;
                }
            };
            // Already on disk; apply without appending again.
            entry.is_put_log = false;
            match self.resolve(&entry) {
                Ok(_) => applied += 1,
                Err(e) => log::warn!("Skipping log line {} in {:?}: {e}", n + 1, self.path),
            }
        }

        Ok(applied)
    }
}
