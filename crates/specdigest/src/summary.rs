//! The result payload of a finished job.

use serde::{Deserialize, Serialize};

use crate::llm::{EndpointAnalysis, SpecAnalysis};
use crate::parser::ParsedSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecInfo {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOverview {
    pub overview: String,
}

/// Stored as `summary.json` and as the job's SUCCESS result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub spec_info: SpecInfo,
    pub summary: SummaryOverview,
    pub endpoints: Vec<EndpointAnalysis>,
}

impl SummaryDocument {
    pub fn new(spec_info: SpecInfo, analysis: SpecAnalysis) -> Self {
        Self {
            spec_info,
            summary: SummaryOverview {
                overview: analysis.overview,
            },
            endpoints: analysis.endpoints,
        }
    }

    /// The analysis this summary was built from.
    pub fn analysis(&self) -> SpecAnalysis {
        SpecAnalysis {
            overview: self.summary.overview.clone(),
            endpoints: self.endpoints.clone(),
        }
    }
}

impl From<&ParsedSpec> for SpecInfo {
    fn from(spec: &ParsedSpec) -> Self {
        Self {
            title: spec.title.clone(),
            version: spec.version.clone(),
            description: spec.description.clone(),
        }
    }
}
