//! HTTP surface over the job pipeline.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
