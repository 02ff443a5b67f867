//! Stage bodies. Each one is safe to run again for the same job: cached
//! artifacts are reused instead of recomputed.

use tracing::{debug, info};

use super::error::StageError;
use super::progress::{ProgressReporter, StoreProgress};
use super::results::{AnalysisResult, ExportResult, ParseRequest, ParseResult};
use super::PipelineDeps;
use crate::error::StorageError;
use crate::parser::{parse_spec, ParsedSpec};
use crate::state::Stage;
use crate::storage::export::render_endpoints_markdown;
use crate::storage::JobStorage;
use crate::summary::{SpecInfo, SummaryDocument};

pub const OVERVIEW_OUTPUT: &str = "overview.md";
pub const ENDPOINTS_OUTPUT: &str = "endpoints.md";

fn progress_for(deps: &PipelineDeps, job_id: &str) -> StoreProgress {
    StoreProgress::new(deps.store.clone(), job_id)
}

/// Parses the raw document, or returns the cached parse untouched.
pub async fn parse_stage(
    deps: &PipelineDeps,
    task_id: &str,
    request: &ParseRequest,
) -> Result<ParseResult, StageError> {
    let storage = JobStorage::open(&deps.storage_root, &request.job_id)?;
    let progress = progress_for(deps, &request.job_id);
    progress.report(Stage::Parsing, 0.0, "Parsing specification");

    let (parsed_spec_path, endpoint_count) = match (
        storage.get_parsed_spec(),
        storage.load_parsed_spec(),
    ) {
        (Some(path), Some(cached)) => {
            debug!(job_id = %request.job_id, "Using cached parsed specification");
            (path, cached.endpoints.len())
        }
        _ => {
            let text = std::fs::read_to_string(&request.spec_path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StageError::MissingInput(format!(
                        "specification file {}",
                        request.spec_path.display()
                    ))
                } else {
                    StageError::Storage(StorageError::ReadFile {
                        path: request.spec_path.clone(),
                        source: e,
                    })
                }
            })?;
            let parsed = parse_spec(&text)?;
            let path = storage.save_parsed_spec(&parsed)?;
            (path, parsed.endpoints.len())
        }
    };

    progress.report(
        Stage::Parsing,
        100.0,
        &format!("Parsed {endpoint_count} endpoints"),
    );
    Ok(ParseResult {
        job_id: request.job_id.clone(),
        task_id: task_id.to_string(),
        parsed_spec_path,
        endpoint_count,
    })
}

/// The cached parse, re-parsing the raw document when it is missing or corrupt.
fn load_or_reparse(storage: &JobStorage) -> Result<ParsedSpec, StageError> {
    if let Some(parsed) = storage.load_parsed_spec() {
        return Ok(parsed);
    }
    info!(job_id = %storage.job_id(), "Parsed specification unavailable, parsing again");
    let text = storage
        .read_spec()?
        .ok_or_else(|| StageError::MissingInput("specification file".to_string()))?;
    let parsed = parse_spec(&text)?;
    storage.save_parsed_spec(&parsed)?;
    Ok(parsed)
}

/// Runs the analyzer, unless a summary from an earlier delivery exists.
pub async fn analyze_stage(
    deps: &PipelineDeps,
    task_id: &str,
    input: &ParseResult,
) -> Result<AnalysisResult, StageError> {
    let storage = JobStorage::open(&deps.storage_root, &input.job_id)?;
    let progress = progress_for(deps, &input.job_id);
    progress.report(Stage::Analysis, 0.0, "Starting analysis");

    let spec = load_or_reparse(&storage)?;

    let analysis = match storage.load_summary() {
        Some(summary) => {
            debug!(job_id = %input.job_id, "Reusing saved summary");
            summary.analysis()
        }
        None => deps.analyzer.analyze(&spec, &progress).await?,
    };

    progress.report(Stage::Analysis, 100.0, "Analysis complete");
    Ok(AnalysisResult {
        job_id: input.job_id.clone(),
        task_id: task_id.to_string(),
        spec_info: SpecInfo::from(&spec),
        endpoints: spec
            .endpoints
            .iter()
            .map(|e| format!("{} {}", e.method, e.path))
            .collect(),
        analysis,
    })
}

fn overview_markdown(summary: &SummaryDocument) -> String {
    format!(
        "# {} (v{})\n\n{}\n",
        summary.spec_info.title,
        summary.spec_info.version,
        summary.summary.overview.trim()
    )
}

/// Saves the summary and its text outputs, then records SUCCESS.
pub async fn export_stage(
    deps: &PipelineDeps,
    task_id: &str,
    input: &AnalysisResult,
) -> Result<ExportResult, StageError> {
    let storage = JobStorage::open(&deps.storage_root, &input.job_id)?;
    let progress = progress_for(deps, &input.job_id);
    progress.report(Stage::Export, 0.0, "Writing outputs");

    let fresh = SummaryDocument::new(input.spec_info.clone(), input.analysis.clone());
    let summary_path = storage.save_summary(&fresh)?;
    let summary = storage.load_summary().unwrap_or(fresh);

    let mut outputs = vec![summary_path];
    let renderers: [(&str, fn(&SummaryDocument) -> String); 2] = [
        (OVERVIEW_OUTPUT, overview_markdown),
        (ENDPOINTS_OUTPUT, render_endpoints_markdown),
    ];
    for (name, render) in renderers {
        let path = match storage.get_output(name) {
            Some(path) => path,
            None => storage.save_output(name, &render(&summary))?,
        };
        outputs.push(path);
    }

    progress.report(Stage::Export, 100.0, "Export complete");
    deps.store.set_success(&input.job_id, summary)?;
    info!(job_id = %input.job_id, "Job completed");

    Ok(ExportResult {
        job_id: input.job_id.clone(),
        task_id: task_id.to_string(),
        outputs,
    })
}
