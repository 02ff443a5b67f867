//! Typed payloads passed between stages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::llm::SpecAnalysis;
use crate::state::Stage;
use crate::summary::SpecInfo;

/// Input of the parse stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub job_id: String,
    pub spec_path: PathBuf,
}

/// Refers to the cached parse rather than carrying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub job_id: String,
    pub task_id: String,
    pub parsed_spec_path: PathBuf,
    pub endpoint_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: String,
    pub task_id: String,
    pub spec_info: SpecInfo,
    pub analysis: SpecAnalysis,
    /// `METHOD path` of every analyzed endpoint.
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub job_id: String,
    pub task_id: String,
    pub outputs: Vec<PathBuf>,
}

/// A unit of work on the queue, tagged with the stage it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "input", rename_all = "snake_case")]
pub enum StageMessage {
    Parse(ParseRequest),
    Analyze(ParseResult),
    Export(AnalysisResult),
}

impl StageMessage {
    pub fn job_id(&self) -> &str {
        match self {
            StageMessage::Parse(m) => &m.job_id,
            StageMessage::Analyze(m) => &m.job_id,
            StageMessage::Export(m) => &m.job_id,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageMessage::Parse(_) => Stage::Parsing,
            StageMessage::Analyze(_) => Stage::Analysis,
            StageMessage::Export(_) => Stage::Export,
        }
    }
}
