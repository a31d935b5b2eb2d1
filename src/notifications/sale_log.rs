use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tracing::error;

use super::{ObserverError, SaleCompleted, SaleObserver};

/// Appends every completed sale as one JSON line. Inside a runtime the write
/// runs on the blocking pool; lines from concurrent sales may land in any order.
pub struct SaleLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl SaleLog {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SaleObserver for SaleLog {
    fn name(&self) -> &str {
        "sale-log"
    }

    fn on_sale_completed(&self, event: &SaleCompleted) -> Result<(), ObserverError> {
        let line = serde_json::to_string(event)
            .map_err(|e| ObserverError::new(format!("cannot encode sale: {}", e)))?;

        match Handle::try_current() {
            Ok(handle) => {
                let file = self.file.clone();
                let path = self.path.clone();
                let code = event.ticket.code.clone();
                handle.spawn_blocking(move || {
                    if let Err(e) = append(&file, &path, &line) {
                        error!(code = %code, "Sale log write failed: {}", e);
                    }
                });
                Ok(())
            }
            Err(_) => append(&self.file, &self.path, &line),
        }
    }
}

fn append(file: &Mutex<File>, path: &Path, line: &str) -> Result<(), ObserverError> {
    let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
    file.write_all(format!("{}\n", line).as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| ObserverError::new(format!("cannot write {}: {}", path.display(), e)))
}
