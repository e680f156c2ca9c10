use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::document::PredictionDocument;
use crate::error::{PipelineError, Result};
use crate::race_config::validate_race_id;
use crate::schema::ValidatedDocument;

/// One current prediction document per race, `<dir>/<race_id>.json`.
#[derive(Debug, Clone)]
pub struct PredictionStore {
    dir: PathBuf,
}

impl PredictionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, race_id: &str) -> PathBuf {
        self.dir.join(format!("{race_id}.json"))
    }

    /// Replaces any previous document for the race in one rename.
    pub fn write(&self, race_id: &str, doc: &ValidatedDocument) -> Result<PathBuf> {
        validate_race_id(race_id)?;
        let json = serde_json::to_string_pretty(doc.document())
            .map_err(|err| PipelineError::Persist(format!("serialize prediction: {err}")))?;
        fs::create_dir_all(&self.dir).map_err(|err| {
            PipelineError::Persist(format!("create {}: {err}", self.dir.display()))
        })?;
        let path = self.path_for(race_id);
        atomic_write(&path, |file| {
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")
        })
        .map_err(|err| PipelineError::Persist(format!("write {}: {err}", path.display())))?;
        tracing::info!(path = %path.display(), "prediction document written");
        Ok(path)
    }

    /// `Ok(None)` means the race has not been predicted yet.
    pub fn load(&self, race_id: &str) -> Result<Option<PredictionDocument>> {
        validate_race_id(race_id)?;
        let path = self.path_for(race_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PipelineError::Persist(format!(
                    "read {}: {err}",
                    path.display()
                )));
            }
        };
        serde_json::from_str::<PredictionDocument>(&raw)
            .map(Some)
            .map_err(|err| PipelineError::Persist(format!("parse {}: {err}", path.display())))
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{nanos}.tmp", process::id()))
}

/// Writes through a sibling temp file, fsyncs it, then renames it over
/// `path`. On error the temp file is removed and `path` is untouched.
pub fn atomic_write(path: &Path, body: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        body(&mut file)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_body_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        let err = atomic_write(&path, |f| {
            f.write_all(b"{\"partial\":")?;
            Err(io::Error::other("interrupted"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "interrupted");
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = PredictionStore::new(dir.path());
        assert!(store.load("monaco").unwrap().is_none());
    }

    #[test]
    fn load_corrupt_is_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("monaco.json"), "{").unwrap();
        let err = PredictionStore::new(dir.path()).load("monaco").unwrap_err();
        assert!(matches!(err, PipelineError::Persist(_)));
    }
}
