//! Rendering of a finished summary into downloadable documents.

use std::io::{Cursor, Write};
use std::str::FromStr;

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::StorageError;
use crate::summary::SummaryDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "md")]
    Markdown,
    #[serde(rename = "html")]
    Html,
    #[serde(rename = "docx")]
    Docx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_ext(self.extension())
            .first_or_octet_stream()
            .to_string()
    }

    pub fn file_name(&self) -> String {
        format!("summary.{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "html" => Ok(ExportFormat::Html),
            "docx" => Ok(ExportFormat::Docx),
            other => Err(format!("Unsupported export format: {other}")),
        }
    }
}

pub fn render_export(
    summary: &SummaryDocument,
    format: ExportFormat,
) -> Result<Vec<u8>, StorageError> {
    match format {
        ExportFormat::Markdown => Ok(render_markdown(summary).into_bytes()),
        ExportFormat::Html => Ok(render_html(summary).into_bytes()),
        ExportFormat::Docx => render_docx(summary).map_err(|reason| StorageError::Render {
            format: "docx".to_string(),
            reason,
        }),
    }
}

pub fn render_markdown(summary: &SummaryDocument) -> String {
    let info = &summary.spec_info;
    let mut out = format!("# {} (v{})\n\n", info.title, info.version);
    if let Some(description) = &info.description {
        out.push_str(description.trim());
        out.push_str("\n\n");
    }
    out.push_str("## Overview\n\n");
    out.push_str(summary.summary.overview.trim());
    out.push_str("\n\n");
    out.push_str(&render_endpoints_markdown(summary));
    out
}

/// Just the `## Endpoints` section, also saved on its own as `endpoints.md`.
pub fn render_endpoints_markdown(summary: &SummaryDocument) -> String {
    let mut out = String::from("## Endpoints\n");
    for endpoint in &summary.endpoints {
        out.push_str(&format!(
            "\n### {} {}\n\n{}\n",
            endpoint.method,
            endpoint.path,
            endpoint.analysis.trim()
        ));
    }
    out
}

fn html_paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", escape(p).replace('\n', "<br>\n")))
        .collect()
}

pub fn render_html(summary: &SummaryDocument) -> String {
    let info = &summary.spec_info;
    let title = escape(info.title.as_str());
    let mut body = format!(
        "<h1>{} <small>v{}</small></h1>\n",
        title,
        escape(info.version.as_str())
    );
    if let Some(description) = &info.description {
        body.push_str(&html_paragraphs(description));
    }
    body.push_str("<h2>Overview</h2>\n");
    body.push_str(&html_paragraphs(&summary.summary.overview));
    body.push_str("<h2>Endpoints</h2>\n");
    for endpoint in &summary.endpoints {
        body.push_str(&format!(
            "<h3><code>{} {}</code></h3>\n",
            escape(endpoint.method.as_str()),
            escape(endpoint.path.as_str())
        ));
        body.push_str(&html_paragraphs(&endpoint.analysis));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n</head>\n<body>\n{body}</body>\n</html>\n"
    )
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

fn docx_paragraph(text: &str, size_half_points: Option<u32>) -> String {
    let props = match size_half_points {
        Some(size) => format!("<w:rPr><w:b/><w:sz w:val=\"{size}\"/></w:rPr>"),
        None => String::new(),
    };
    format!(
        "<w:p><w:r>{props}<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        escape(text)
    )
}

fn docx_text(out: &mut String, text: &str) {
    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        out.push_str(&docx_paragraph(line, None));
    }
}

fn document_xml(summary: &SummaryDocument) -> String {
    let info = &summary.spec_info;
    let mut body = docx_paragraph(&format!("{} (v{})", info.title, info.version), Some(40));
    if let Some(description) = &info.description {
        docx_text(&mut body, description);
    }
    body.push_str(&docx_paragraph("Overview", Some(32)));
    docx_text(&mut body, &summary.summary.overview);
    body.push_str(&docx_paragraph("Endpoints", Some(32)));
    for endpoint in &summary.endpoints {
        body.push_str(&docx_paragraph(
            &format!("{} {}", endpoint.method, endpoint.path),
            Some(26),
        ));
        docx_text(&mut body, &endpoint.analysis);
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}</w:body></w:document>"
    )
}

fn render_docx(summary: &SummaryDocument) -> Result<Vec<u8>, String> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", RELS_XML.to_string()),
        ("word/document.xml", document_xml(summary)),
    ];
    for (name, content) in parts {
        writer.start_file(name, options).map_err(|e| e.to_string())?;
        writer
            .write_all(content.as_bytes())
            .map_err(|e| e.to_string())?;
    }

    let cursor = writer.finish().map_err(|e| e.to_string())?;
    Ok(cursor.into_inner())
}
