//! Prompt templates.

use std::fmt::Write;

use crate::parser::{ParsedEndpoint, ParsedSpec};

pub const SYSTEM_PROMPT: &str = "You are an expert in API documentation and technical writing. \
Provide clear, concise, and technically accurate responses.";

pub fn overview_prompt(spec: &ParsedSpec) -> String {
    let endpoints: Vec<String> = spec.endpoints.iter().map(format_endpoint).collect();
    format!(
        "Analyze this API specification and provide a comprehensive overview.\n\n\
         API: {title} (v{version})\n\
         Description: {description}\n\n\
         Endpoints:\n{endpoints}\n\n\
         Provide:\n\
         1. A high-level overview of the API's purpose and functionality\n\
         2. Key features and capabilities\n\
         3. Common use cases\n\
         4. Notable patterns or conventions\n\
         5. Potential integration considerations\n\n\
         Keep the description technical and focused on usage.",
        title = spec.title,
        version = spec.version,
        description = spec
            .description
            .as_deref()
            .unwrap_or("No description provided"),
        endpoints = endpoints.join("\n"),
    )
}

pub fn endpoint_prompt(endpoint: &ParsedEndpoint) -> String {
    format!(
        "Analyze this API endpoint and provide detailed documentation.\n\n\
         {endpoint}\n\n\
         Provide:\n\
         1. Purpose and functionality\n\
         2. Request/response patterns\n\
         3. Error handling\n\
         4. Security considerations\n\
         5. Integration examples\n\n\
         Keep the description technical and focused on usage.",
        endpoint = format_endpoint(endpoint),
    )
}

/// Asks for an answer grounded in retrieved excerpts of the raw document.
pub fn query_prompt(question: &str, excerpts: &[&str]) -> String {
    let mut context = String::new();
    for (i, excerpt) in excerpts.iter().enumerate() {
        let _ = write!(context, "--- Excerpt {} ---\n{}\n\n", i + 1, excerpt.trim_end());
    }
    format!(
        "Answer the question about this API using only the specification excerpts below. \
         If the excerpts do not contain the answer, say so.\n\n\
         {context}Question: {question}"
    )
}

fn format_endpoint(endpoint: &ParsedEndpoint) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} {}", endpoint.method, endpoint.path);
    let _ = write!(
        out,
        "Summary: {}",
        endpoint.summary.as_deref().unwrap_or("No summary provided")
    );

    if let Some(description) = &endpoint.description {
        let _ = write!(out, "\nDescription: {description}");
    }

    if !endpoint.parameters.is_empty() {
        out.push_str("\n\nParameters:");
        for param in &endpoint.parameters {
            let required = if param.required { " (required)" } else { "" };
            let _ = write!(out, "\n- {} ({}){}", param.name, param.location, required);
            if let Some(description) = &param.description {
                let _ = write!(out, "\n  {description}");
            }
        }
    }

    if let Some(body) = &endpoint.request_body {
        out.push_str("\n\nRequest Body:");
        let _ = write!(out, "\nContent Type: {}", body.content_type);
        if let Some(description) = &body.description {
            let _ = write!(out, "\nDescription: {description}");
        }
    }

    if !endpoint.responses.is_empty() {
        out.push_str("\n\nResponses:");
        for (status, response) in &endpoint.responses {
            let _ = write!(
                out,
                "\n- {}: {}",
                status,
                response.description.as_deref().unwrap_or("No description")
            );
            if let Some(content_type) = &response.content_type {
                let _ = write!(out, "\n  Content Type: {content_type}");
            }
        }
    }

    out
}
