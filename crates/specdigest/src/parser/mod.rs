//! OpenAPI / Swagger document parsing.
//!
//! Only document-level structure is fatal. Broken path items, operations,
//! parameters or responses are logged and the affected endpoint is
//! dropped.

pub mod document;
pub mod error;
pub mod model;
pub mod openapi;
pub mod refs;

pub use error::{ReferenceError, SpecValidationError};
pub use model::{ParsedEndpoint, ParsedParameter, ParsedRequestBody, ParsedResponse, ParsedSpec};
pub use openapi::{parse_document, parse_spec, SUPPORTED_METHODS};
