//! File drop-box between operator commands and a running worker.
//!
//! The state store is held open by exactly one process. While a worker owns
//! it, operator commands cannot open it, so they leave requests here instead
//! and read the status snapshots the worker publishes.

use engine_core::progress::RunProgress;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

const CANCEL_PREFIX: &str = "cancel-";
const STATUS_PREFIX: &str = "status-";

#[derive(Debug, Clone)]
pub struct ControlDir {
    root: PathBuf,
}

impl ControlDir {
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Run ids are free text, so files are named by a hash of the id.
    fn file_stem(run_id: &str) -> String {
        blake3::hash(run_id.as_bytes()).to_hex()[..16].to_string()
    }

    /// Writes `body` next to `name` and renames it into place, so readers
    /// never see a partly written file.
    async fn write_atomic(&self, name: &str, body: &[u8]) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        let tmp = self.root.join(format!(".{name}.tmp"));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    pub async fn request_cancel(&self, run_id: &str) -> io::Result<PathBuf> {
        let name = format!("{CANCEL_PREFIX}{}", Self::file_stem(run_id));
        self.write_atomic(&name, run_id.as_bytes()).await
    }

    /// Removes and returns every pending cancel request. Empty request files
    /// are left for a later poll.
    pub async fn take_cancel_requests(&self) -> io::Result<Vec<String>> {
        let mut run_ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(CANCEL_PREFIX) {
                continue;
            }
            let run_id = match fs::read_to_string(entry.path()).await {
                Ok(run_id) => run_id,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if run_id.trim().is_empty() {
                continue;
            }
            fs::remove_file(entry.path()).await?;
            run_ids.push(run_id);
        }

        Ok(run_ids)
    }

    pub async fn publish_status(&self, progress: &RunProgress) -> io::Result<()> {
        let name = format!("{STATUS_PREFIX}{}.json", Self::file_stem(&progress.run_id));
        let body = serde_json::to_vec_pretty(progress)?;
        self.write_atomic(&name, &body).await.map(|_| ())
    }

    pub async fn read_status(&self, run_id: &str) -> io::Result<Option<RunProgress>> {
        let path = self
            .root
            .join(format!("{STATUS_PREFIX}{}.json", Self::file_stem(run_id)));
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
