use std::path::PathBuf;

use crate::pipeline::Pipeline;
use crate::query::QueryService;
use crate::state::StateStore;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub storage_root: PathBuf,
    pub pipeline: Pipeline,
    pub queries: QueryService,
    pub max_upload_bytes: usize,
}
