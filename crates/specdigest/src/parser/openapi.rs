use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::document::load_document;
use super::error::SpecValidationError;
use super::model::{
    ParsedEndpoint, ParsedParameter, ParsedRequestBody, ParsedResponse, ParsedSpec,
};
use super::refs::resolve_refs;

/// HTTP methods that produce endpoints. TRACE and CONNECT are ignored.
pub const SUPPORTED_METHODS: [&str; 7] =
    ["get", "post", "put", "delete", "patch", "head", "options"];

const DEFAULT_TITLE: &str = "Untitled API";
const DEFAULT_VERSION: &str = "0.0.0";
const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    OpenApi3,
    Swagger2,
}

/// Parses YAML or JSON specification text.
pub fn parse_spec(text: &str) -> Result<ParsedSpec, SpecValidationError> {
    let document = load_document(text)?;
    parse_document(&document)
}

/// Parses an already-loaded specification document.
pub fn parse_document(document: &Value) -> Result<ParsedSpec, SpecValidationError> {
    let root = document.as_object().ok_or(SpecValidationError::NotAnObject)?;
    let dialect = detect_dialect(root)?;

    let info = root
        .get("info")
        .and_then(Value::as_object)
        .ok_or(SpecValidationError::MissingInfo)?;

    let title = string_field(info, "title")
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let version = scalar_to_string(info.get("version"))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    let description = string_field(info, "description");

    let resolved = match resolve_refs(document) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "Reference resolution failed, parsing unresolved document");
            document.clone()
        }
    };

    let context = DocumentContext {
        dialect,
        consumes: string_list(root.get("consumes")),
        produces: string_list(root.get("produces")),
    };
    let endpoints = parse_paths(resolved.get("paths"), &context);

    let components_key = match dialect {
        Dialect::OpenApi3 => "components",
        Dialect::Swagger2 => "definitions",
    };
    let components = root
        .get(components_key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    debug!(%title, %version, endpoints = endpoints.len(), "Parsed specification");

    Ok(ParsedSpec {
        title,
        version,
        description,
        endpoints,
        components,
    })
}

fn detect_dialect(root: &Map<String, Value>) -> Result<Dialect, SpecValidationError> {
    if let Some(value) = root.get("openapi") {
        let version = scalar_to_string(Some(value))
            .ok_or_else(|| SpecValidationError::UnsupportedVersion(value.to_string()))?;
        return if version.starts_with("3.") {
            Ok(Dialect::OpenApi3)
        } else {
            Err(SpecValidationError::UnsupportedVersion(version))
        };
    }

    if let Some(value) = root.get("swagger") {
        let version = scalar_to_string(Some(value))
            .ok_or_else(|| SpecValidationError::UnsupportedVersion(value.to_string()))?;
        return if version == "2.0" || version == "2" {
            Ok(Dialect::Swagger2)
        } else {
            Err(SpecValidationError::UnsupportedVersion(version))
        };
    }

    Err(SpecValidationError::MissingVersion)
}

struct DocumentContext {
    dialect: Dialect,
    consumes: Vec<String>,
    produces: Vec<String>,
}

fn parse_paths(paths: Option<&Value>, context: &DocumentContext) -> Vec<ParsedEndpoint> {
    let paths = match paths {
        Some(Value::Object(paths)) => paths,
        Some(_) => {
            warn!("'paths' is not a mapping, specification has no endpoints");
            return Vec::new();
        }
        None => {
            warn!("Specification has no 'paths' section");
            return Vec::new();
        }
    };

    let mut endpoints = Vec::new();
    for (path, item) in paths {
        if path.starts_with("x-") {
            continue;
        }
        let Some(item) = item.as_object() else {
            warn!(%path, "Skipping path item that is not a mapping");
            continue;
        };

        let shared_parameters = match parse_parameters(item.get("parameters")) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(%path, %reason, "Skipping path item with invalid parameters");
                continue;
            }
        };

        for (key, operation) in item {
            let method = key.to_ascii_lowercase();
            if !SUPPORTED_METHODS.contains(&method.as_str()) {
                continue;
            }

            match parse_operation(path, &method, operation, &shared_parameters, context) {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(reason) => {
                    warn!(%path, method = %method.to_uppercase(), %reason, "Skipping invalid operation");
                }
            }
        }
    }

    endpoints
}

fn parse_operation(
    path: &str,
    method: &str,
    operation: &Value,
    shared_parameters: &[ParsedParameter],
    context: &DocumentContext,
) -> Result<ParsedEndpoint, String> {
    let operation = operation
        .as_object()
        .ok_or_else(|| "operation is not a mapping".to_string())?;

    let mut request_body = None;
    let mut parameters = parse_parameters(operation.get("parameters"))?;

    if context.dialect == Dialect::Swagger2 {
        if let Some(index) = parameters.iter().position(|p| p.location == "body") {
            let body = parameters.remove(index);
            let content_type = string_list(operation.get("consumes"))
                .into_iter()
                .next()
                .or_else(|| context.consumes.first().cloned())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            request_body = Some(ParsedRequestBody {
                content_type,
                description: body.description,
                required: body.required,
                schema: body.schema,
            });
        }
    }

    for shared in shared_parameters {
        let overridden = parameters
            .iter()
            .any(|p| p.name == shared.name && p.location == shared.location);
        if !overridden {
            parameters.push(shared.clone());
        }
    }

    if let Some(body) = operation.get("requestBody") {
        request_body = Some(parse_request_body(body)?);
    }

    let produces = {
        let local = string_list(operation.get("produces"));
        if local.is_empty() {
            context.produces.clone()
        } else {
            local
        }
    };
    let responses = parse_responses(operation.get("responses"), context.dialect, &produces)?;

    Ok(ParsedEndpoint {
        method: method.to_uppercase(),
        path: path.to_string(),
        summary: string_field(operation, "summary"),
        description: string_field(operation, "description"),
        operation_id: string_field(operation, "operationId"),
        tags: string_list(operation.get("tags")),
        parameters,
        request_body,
        responses,
    })
}

fn parse_parameters(value: Option<&Value>) -> Result<Vec<ParsedParameter>, String> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| "'parameters' is not a list".to_string())?;

    let mut parameters = Vec::with_capacity(items.len());
    for item in items {
        let param = item
            .as_object()
            .ok_or_else(|| "parameter is not a mapping".to_string())?;

        if param.contains_key("$ref") {
            debug!("Ignoring unresolved parameter reference");
            continue;
        }

        let name = string_field(param, "name")
            .ok_or_else(|| "parameter has no name".to_string())?;
        let location = string_field(param, "in").unwrap_or_else(|| "query".to_string());
        let required = param
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(location == "path");

        parameters.push(ParsedParameter {
            name,
            location,
            required,
            description: string_field(param, "description"),
            schema: param.get("schema").cloned(),
        });
    }

    Ok(parameters)
}

fn parse_request_body(value: &Value) -> Result<ParsedRequestBody, String> {
    let body = value
        .as_object()
        .ok_or_else(|| "'requestBody' is not a mapping".to_string())?;

    let (content_type, schema) = pick_media(body.get("content"))
        .unwrap_or_else(|| (DEFAULT_CONTENT_TYPE.to_string(), None));

    Ok(ParsedRequestBody {
        content_type,
        description: string_field(body, "description"),
        required: body.get("required").and_then(Value::as_bool).unwrap_or(false),
        schema,
    })
}

fn parse_responses(
    value: Option<&Value>,
    dialect: Dialect,
    produces: &[String],
) -> Result<BTreeMap<String, ParsedResponse>, String> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let responses = value
        .as_object()
        .ok_or_else(|| "'responses' is not a mapping".to_string())?;

    let mut parsed = BTreeMap::new();
    for (status, response) in responses {
        if status.starts_with("x-") {
            continue;
        }
        let response = response
            .as_object()
            .ok_or_else(|| format!("response '{status}' is not a mapping"))?;

        let (content_type, schema) = match dialect {
            Dialect::OpenApi3 => match pick_media(response.get("content")) {
                Some((content_type, schema)) => (Some(content_type), schema),
                None => (None, None),
            },
            Dialect::Swagger2 => {
                let schema = response.get("schema").cloned();
                let content_type = schema.as_ref().and_then(|_| produces.first().cloned());
                (content_type, schema)
            }
        };

        parsed.insert(
            status.clone(),
            ParsedResponse {
                description: string_field(response, "description"),
                content_type,
                schema,
            },
        );
    }

    Ok(parsed)
}

/// Picks `application/json` when offered, otherwise the first media type.
/// Returns the content type and the media type's schema.
fn pick_media(content: Option<&Value>) -> Option<(String, Option<Value>)> {
    let content = content?.as_object()?;
    let (content_type, media) = content
        .get_key_value(DEFAULT_CONTENT_TYPE)
        .or_else(|| content.iter().next())?;
    Some((content_type.clone(), media.get("schema").cloned()))
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn scalar_to_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
