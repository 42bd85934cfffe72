use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const SYMLINK_NAME: &str = "deserialization_errors.log";

/// Per-run JSON-lines log of deserialization failures.
///
/// Each run writes its own timestamped file under `logs/<chain>/`; a stable
/// symlink always points at the latest run. Append failures are logged and
/// never propagate.
#[derive(Debug)]
pub struct DeserializationErrorLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl DeserializationErrorLog {
    pub fn open(base_dir: &Path, chain: &str) -> Result<Self> {
        let dir = base_dir.join(chain);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;

        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let path = dir.join(format!("{started}_deserialization_errors.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open error log {}", path.display()))?;

        let link = dir.join(SYMLINK_NAME);
        refresh_symlink(&path, &link);

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one JSON line; failures are swallowed with a warning.
    pub fn append(&self, data: &Value) {
        let mut writer = self.writer.lock().unwrap();
        let result = serde_json::to_writer(&mut *writer, data)
            .map_err(anyhow::Error::from)
            .and_then(|()| writer.write_all(b"\n").map_err(anyhow::Error::from))
            .and_then(|()| writer.flush().map_err(anyhow::Error::from));

        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to append deserialization error");
        }
    }
}

#[cfg(unix)]
fn refresh_symlink(target: &Path, link: &Path) {
    let _ = fs::remove_file(link);
    if let Err(err) = std::os::unix::fs::symlink(target, link) {
        tracing::warn!(error = %err, link = %link.display(), "failed to refresh error-log symlink");
    }
}

#[cfg(not(unix))]
fn refresh_symlink(_target: &Path, _link: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

    fn scratch_dir() -> PathBuf {
        let seq = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("indexmaster-errlog-{}-{seq}", std::process::id()))
    }

    #[test]
    fn appends_json_lines_and_links_latest_run() {
        let base = scratch_dir();
        let log = DeserializationErrorLog::open(&base, "wax").unwrap();

        log.append(&json!({"gs": 1, "error": "abi mismatch"}));
        log.append(&json!({"gs": 2, "error": "truncated payload"}));

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["error"], "abi mismatch");

        let link = base.join("wax").join(SYMLINK_NAME);
        let resolved = fs::read_link(&link).unwrap();
        assert_eq!(resolved, log.path());

        fs::remove_dir_all(&base).unwrap();
    }
}
