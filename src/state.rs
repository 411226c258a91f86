//! File-backed mirror of the published TXT payloads.
//!
//! The in-memory record store stays authoritative; the state file only
//! exists so a restart republishes the same TXT set. Writes go to a sibling
//! temp file and are renamed over the target, preserving the file mode.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dns::enums::RecordType;
use crate::dnssec::rdata::txt_payload;
use crate::dnssec::Signer;
use crate::error::{HighwayError, Result};

const DEFAULT_STATE_MODE: u32 = 0o644;

pub struct StateFile {
    path: PathBuf,
    signer: Arc<Signer>,
    last_write: Mutex<Option<Instant>>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>, signer: Arc<Signer>) -> Arc<Self> {
        Arc::new(StateFile {
            path: path.into(),
            signer,
            last_write: Mutex::new(None),
        })
    }

    /// Load the persisted TXT payloads and queue them as one record set.
    /// Missing or malformed files are not fatal; the server starts empty.
    pub async fn load(&self) -> Result<usize> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to read state file: {}", e);
                return Ok(0);
            }
        };

        let entries: Vec<String> = match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to unpack state file: {}", e);
                return Ok(0);
            }
        };

        let records: Vec<_> = entries
            .iter()
            .filter(|entry| !entry.is_empty())
            .map(|entry| self.signer.txt_record(entry))
            .collect();

        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        self.signer.add(records).await?;
        info!("Loaded state file with {} records", count);
        Ok(count)
    }

    /// Persist the current TXT payload list.
    ///
    /// `issued` is the time the triggering mutation was accepted; writes
    /// whose trigger is older than the last completed write are discarded,
    /// so out-of-order completions cannot roll the file back.
    pub fn store(&self, issued: Instant) {
        let mut last_write = self.last_write.lock();
        if let Some(last) = *last_write {
            if last > issued {
                return;
            }
        }
        *last_write = Some(issued);

        let Some(answer) = self.signer.get(RecordType::TXT.code()) else {
            return;
        };

        let data: Vec<String> = answer.records.iter().filter_map(txt_payload).collect();

        if let Err(e) = self.write_atomic(&data) {
            warn!("Failed to write state file: {}", e);
        } else {
            debug!("Saved state file");
        }
    }

    fn write_atomic(&self, data: &[String]) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(data)
            .map_err(|e| HighwayError::StateFile(e.to_string()))?;

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push("_");
        let temp_path = PathBuf::from(temp_path);

        std::fs::write(&temp_path, &encoded)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // carry over the mode bits of the file being replaced
            let mode = std::fs::metadata(&self.path)
                .map(|meta| meta.permissions().mode())
                .unwrap_or(DEFAULT_STATE_MODE);
            let _ = std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(mode));
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
