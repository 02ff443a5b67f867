use thiserror::Error;

/// Fatal, document-level problems with an uploaded specification.
///
/// Problems inside individual paths or operations never surface here; the
/// offending endpoint is skipped instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecValidationError {
    #[error("Malformed YAML/JSON: {0}")]
    Malformed(String),

    #[error("Specification must be a JSON or YAML object")]
    NotAnObject,

    #[error("Missing 'openapi' or 'swagger' version field")]
    MissingVersion,

    #[error("Unsupported specification version: {0}")]
    UnsupportedVersion(String),

    #[error("Missing or invalid 'info' section")]
    MissingInfo,
}

/// Local `$ref` resolution failures. Never fatal to a parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("External reference '{0}' is not supported")]
    External(String),

    #[error("Reference '{0}' does not point into the document")]
    Unresolvable(String),

    #[error("Reference '{0}' nests deeper than {1} levels")]
    TooDeep(String, usize),

    #[error("Reference expansion exceeds {0} values")]
    TooLarge(usize),
}
