use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::export::{render_export, ExportFormat};
use super::{validate_job_id, write_atomic, StorageError};
use crate::parser::ParsedSpec;
use crate::query::QueryRecord;
use crate::summary::SummaryDocument;

const PARSED_SPEC_FILE: &str = "parsed_spec.json";
const SUMMARY_FILE: &str = "summary.json";
const QUERY_FILE: &str = "query.json";
const EXECUTION_LOG_FILE: &str = "execution.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
}

impl SpecFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SpecFormat::Yaml => "yaml",
            SpecFormat::Json => "json",
        }
    }

    /// JSON when the declared type says so or the text opens an object.
    pub fn detect(content_type: &str, text: &str) -> Self {
        if content_type.eq_ignore_ascii_case("application/json")
            || text.trim_start().starts_with('{')
        {
            SpecFormat::Json
        } else {
            SpecFormat::Yaml
        }
    }
}

/// The artifact directory of a single job: `<root>/<job_id>/`.
#[derive(Debug, Clone)]
pub struct JobStorage {
    job_id: String,
    dir: PathBuf,
}

impl JobStorage {
    /// Attaches to the job directory, creating it when missing.
    pub fn create(root: &Path, job_id: &str) -> Result<Self, StorageError> {
        let storage = Self::open(root, job_id)?;
        std::fs::create_dir_all(&storage.dir).map_err(|e| StorageError::CreateDirectory {
            path: storage.dir.clone(),
            source: e,
        })?;
        Ok(storage)
    }

    /// Attaches to the job directory without touching the filesystem.
    pub fn open(root: &Path, job_id: &str) -> Result<Self, StorageError> {
        validate_job_id(job_id)?;
        Ok(Self {
            job_id: job_id.to_string(),
            dir: root.join(job_id),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A job exists once its raw spec has been saved.
    pub fn job_exists(&self) -> bool {
        self.get_spec().is_some()
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn existing(&self, name: &str) -> Option<PathBuf> {
        let path = self.file(name);
        path.is_file().then_some(path)
    }

    // Spec

    /// Saves the uploaded document as `spec.<ext>`. The first write wins;
    /// a second call returns the existing file untouched.
    pub fn save_spec(&self, content: &str, format: SpecFormat) -> Result<PathBuf, StorageError> {
        if let Some(existing) = self.get_spec() {
            debug!(job_id = %self.job_id, path = %existing.display(), "Spec already saved");
            return Ok(existing);
        }

        let path = self.file(&format!("spec.{}", format.extension()));
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.sync_all()
            });
        match created {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(path),
            Err(e) => Err(StorageError::WriteFile { path, source: e }),
        }
    }

    pub fn get_spec(&self) -> Option<PathBuf> {
        [SpecFormat::Yaml, SpecFormat::Json]
            .iter()
            .find_map(|format| self.existing(&format!("spec.{}", format.extension())))
    }

    pub fn read_spec(&self) -> Result<Option<String>, StorageError> {
        match self.get_spec() {
            Some(path) => std::fs::read_to_string(&path)
                .map(Some)
                .map_err(|e| StorageError::ReadFile { path, source: e }),
            None => Ok(None),
        }
    }

    // Parsed spec cache

    pub fn save_parsed_spec(&self, parsed: &ParsedSpec) -> Result<PathBuf, StorageError> {
        self.write_json(PARSED_SPEC_FILE, parsed)
    }

    pub fn get_parsed_spec(&self) -> Option<PathBuf> {
        self.existing(PARSED_SPEC_FILE)
    }

    /// The cached parse, or `None` when absent or unreadable.
    pub fn load_parsed_spec(&self) -> Option<ParsedSpec> {
        self.read_json(PARSED_SPEC_FILE)
    }

    // Summary

    /// Writes `summary.json` unless a readable one already exists. An
    /// unreadable file is replaced.
    pub fn save_summary(&self, summary: &SummaryDocument) -> Result<PathBuf, StorageError> {
        if let Some(existing) = self.get_summary() {
            if self.load_summary().is_some() {
                debug!(job_id = %self.job_id, "Summary already saved, keeping it");
                return Ok(existing);
            }
            warn!(job_id = %self.job_id, "Replacing unreadable summary");
        }
        self.write_json(SUMMARY_FILE, summary)
    }

    pub fn get_summary(&self) -> Option<PathBuf> {
        self.existing(SUMMARY_FILE)
    }

    pub fn load_summary(&self) -> Option<SummaryDocument> {
        self.read_json(SUMMARY_FILE)
    }

    // Outputs and exports

    pub fn save_output(&self, name: &str, content: &str) -> Result<PathBuf, StorageError> {
        let path = self.file(name);
        write_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    pub fn get_output(&self, name: &str) -> Option<PathBuf> {
        self.existing(name)
    }

    pub fn get_export(&self, format: ExportFormat) -> Option<PathBuf> {
        self.existing(&format.file_name())
    }

    /// Renders the export on first request and serves the file afterwards.
    pub fn ensure_export_exists(&self, format: ExportFormat) -> Result<PathBuf, StorageError> {
        if let Some(path) = self.get_export(format) {
            return Ok(path);
        }

        let summary = self
            .load_summary()
            .ok_or_else(|| StorageError::SummaryMissing(self.job_id.clone()))?;
        let bytes = render_export(&summary, format)?;
        let path = self.file(&format.file_name());
        write_atomic(&path, &bytes)?;
        debug!(job_id = %self.job_id, format = format.extension(), "Rendered export");
        Ok(path)
    }

    // Execution log

    pub fn log_path(&self) -> PathBuf {
        self.file(EXECUTION_LOG_FILE)
    }

    /// Appends one timestamped line to `execution.log`.
    pub fn append_log(&self, line: &str) -> Result<(), StorageError> {
        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), line)
            .map_err(|e| StorageError::WriteFile { path, source: e })
    }

    // Queries

    pub fn save_query(&self, record: &QueryRecord) -> Result<PathBuf, StorageError> {
        self.write_json(QUERY_FILE, record)
    }

    pub fn get_query(&self) -> Option<QueryRecord> {
        self.read_json(QUERY_FILE)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, StorageError> {
        let path = self.file(name);
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialize {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.existing(name)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cached file");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cached file");
                None
            }
        }
    }
}
