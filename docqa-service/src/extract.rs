//! Format detection and plain-text extraction.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::LoadError;

static DOCX_TEXT_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*)?>([^<]*)</w:t>")
        .expect("unreachable error: failed to compile docx text run pattern")
});

/// A document format with a known text extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// Plain text.
    Text,
    /// JSON.
    Json,
    /// RFC 822 email message.
    Email,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pdf => "PDF",
            Self::Docx => "DOCX",
            Self::Text => "text",
            Self::Json => "JSON",
            Self::Email => "email",
        })
    }
}

impl DocumentFormat {
    /// Map a `Content-Type` header value, ignoring parameters.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "text/plain" => Some(Self::Text),
            "application/json" => Some(Self::Json),
            "message/rfc822" => Some(Self::Email),
            _ => None,
        }
    }

    /// Map the extension of a URL path or file name.
    pub fn from_extension(path: &str) -> Option<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            "eml" => Some(Self::Email),
            _ => None,
        }
    }

    /// Guess from leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(Self::Pdf)
        } else if bytes.starts_with(b"PK") {
            Some(Self::Docx)
        } else {
            None
        }
    }

    /// Resolve the format: content type, then extension, then magic bytes,
    /// then plain text.
    pub fn detect(content_type: Option<&str>, path: &str, bytes: &[u8]) -> Self {
        content_type
            .and_then(Self::from_content_type)
            .or_else(|| Self::from_extension(path))
            .or_else(|| Self::sniff(bytes))
            .unwrap_or(Self::Text)
    }
}

/// Extract trimmed plain text from `bytes` in the given format.
///
/// # Errors
///
/// Returns [`LoadError::Corrupt`] if the bytes do not parse as `format`, or
/// [`LoadError::Empty`] if no text remains.
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<String, LoadError> {
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Text => decode_text(bytes),
        DocumentFormat::Json => extract_json(bytes)?,
        DocumentFormat::Email => extract_email_body(&decode_text(bytes)).to_string(),
    };

    let text = text.trim();
    if text.is_empty() {
        return Err(LoadError::Empty);
    }
    info!(%format, chars = text.chars().count(), "extracted document text");
    Ok(text.to_string())
}

/// Decode UTF-8, falling back to Latin-1 for other byte sequences.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("document is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| char::from(b)).collect()
        }
    }
}

fn extract_json(bytes: &[u8]) -> Result<String, LoadError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| LoadError::Corrupt { format: DocumentFormat::Json, message: e.to_string() })?;
    Ok(json_to_text(&value))
}

/// Flatten a JSON value into searchable text.
///
/// Objects become `key: value` pairs joined by spaces, where string values
/// are kept verbatim, nested values are re-serialized, and other scalars are
/// skipped. Arrays join their items with spaces.
pub fn json_to_text(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some(format!("{key}: {s}")),
                Value::Object(_) | Value::Array(_) => Some(format!("{key}: {value}")),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(" "),
        other => scalar_text(other),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The body of an email: everything after the first blank line, or the
/// whole message if there is none.
pub fn extract_email_body(message: &str) -> &str {
    let crlf = message.find("\r\n\r\n").map(|i| (i, 4));
    let lf = message.find("\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((start, len)) => &message[start + len..],
        None => message,
    }
}

/// Extract the text of every page, skipping pages that fail to decode.
fn extract_pdf(bytes: &[u8]) -> Result<String, LoadError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| LoadError::Corrupt { format: DocumentFormat::Pdf, message: e.to_string() })?;

    let pages = document.get_pages();
    let mut parts = Vec::with_capacity(pages.len());
    for &page in pages.keys() {
        match document.extract_text(&[page]) {
            Ok(text) if !text.trim().is_empty() => parts.push(text),
            Ok(_) => debug!(page, "PDF page has no text"),
            Err(e) => warn!(page, error = %e, "failed to extract text from PDF page"),
        }
    }

    debug!(pages = pages.len(), extracted = parts.len(), "extracted PDF pages");
    Ok(parts.join("\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let corrupt = |message: String| LoadError::Corrupt { format: DocumentFormat::Docx, message };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(e.to_string()))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| corrupt(format!("missing word/document.xml: {e}")))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| corrupt(e.to_string()))?;

    Ok(extract_plaintext_from_docx_xml(&xml))
}

/// Collect the `<w:t>` runs of a `word/document.xml` part.
///
/// Runs are concatenated within a paragraph; non-empty paragraphs are joined
/// with single spaces.
pub fn extract_plaintext_from_docx_xml(xml: &str) -> String {
    xml.split("</w:p>")
        .map(|paragraph| {
            DOCX_TEXT_RUN
                .captures_iter(paragraph)
                .filter_map(|c| c.get(1))
                .map(|m| unescape_xml(m.as_str()))
                .collect::<String>()
        })
        .filter(|paragraph| !paragraph.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(document_xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{Document, Object, Stream, dictionary};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let kids: Vec<Object> = pages
            .iter()
            .map(|text| {
                let operations = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 12.into()]),
                        Operation::new("Td", vec![72.into(), 720.into()]),
                        Operation::new("Tj", vec![Object::string_literal(*text)]),
                        Operation::new("ET", vec![]),
                    ]
                };
                let content = Content { operations };
                let content_id =
                    doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => resources_id,
                })
                .into()
            })
            .collect();

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn detection_prefers_content_type_then_extension_then_magic() {
        assert_eq!(
            DocumentFormat::detect(Some("application/json; charset=utf-8"), "/a.txt", b"{}"),
            DocumentFormat::Json
        );
        assert_eq!(
            DocumentFormat::detect(Some("application/octet-stream"), "/policy.DOCX", b""),
            DocumentFormat::Docx
        );
        assert_eq!(DocumentFormat::detect(None, "/download", b"%PDF-1.7"), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::detect(None, "/download", b"PK\x03\x04"), DocumentFormat::Docx);
        assert_eq!(DocumentFormat::detect(None, "/notes", b"hello"), DocumentFormat::Text);
        assert_eq!(DocumentFormat::from_extension("/v1.2/readme"), None);
    }

    #[test]
    fn text_falls_back_to_latin1() {
        assert_eq!(decode_text(b"caf\xe9"), "café");
        assert_eq!(decode_text("naïve".as_bytes()), "naïve");
    }

    #[test]
    fn json_objects_become_key_value_pairs() {
        let value: Value =
            serde_json::from_str(r#"{"title": "Policy", "limits": {"max": 5}, "active": true}"#)
                .unwrap();
        let text = json_to_text(&value);
        assert!(text.contains("title: Policy"));
        assert!(text.contains(r#"limits: {"max":5}"#));
        assert!(!text.contains("active"));

        let list: Value = serde_json::from_str(r#"["a", 1, "b"]"#).unwrap();
        assert_eq!(json_to_text(&list), "a 1 b");
    }

    #[test]
    fn email_body_follows_first_blank_line() {
        assert_eq!(extract_email_body("Subject: hi\nFrom: x\n\nBody text\n\nmore"), "Body text\n\nmore");
        assert_eq!(extract_email_body("Subject: hi\r\n\r\nBody"), "Body");
        assert_eq!(extract_email_body("no headers here"), "no headers here");
    }

    #[test]
    fn docx_runs_join_within_paragraphs() {
        let xml = r#"<w:document><w:body>
            <w:p><w:r><w:t>Grace </w:t></w:r><w:r><w:t xml:space="preserve">period &amp; terms</w:t></w:r></w:p>
            <w:p><w:r><w:t></w:t></w:r></w:p>
            <w:p><w:r><w:t>Thirty days.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        assert_eq!(extract_plaintext_from_docx_xml(xml), "Grace period & terms Thirty days.");
    }

    #[test]
    fn extracts_docx_archives() {
        let bytes = docx_bytes("<w:p><w:r><w:t>Hello docx</w:t></w:r></w:p>");
        assert_eq!(extract_text(DocumentFormat::Docx, &bytes).unwrap(), "Hello docx");
    }

    #[test]
    fn corrupt_documents_are_reported() {
        assert!(matches!(
            extract_text(DocumentFormat::Docx, b"PK not really a zip"),
            Err(LoadError::Corrupt { format: DocumentFormat::Docx, .. })
        ));
        assert!(matches!(
            extract_text(DocumentFormat::Json, b"{broken"),
            Err(LoadError::Corrupt { format: DocumentFormat::Json, .. })
        ));
        assert!(matches!(
            extract_text(DocumentFormat::Pdf, b"%PDF-1.4 truncated"),
            Err(LoadError::Corrupt { format: DocumentFormat::Pdf, .. })
        ));
    }

    #[test]
    fn whitespace_only_text_is_empty() {
        assert!(matches!(extract_text(DocumentFormat::Text, b"  \n\t "), Err(LoadError::Empty)));
        assert_eq!(extract_text(DocumentFormat::Text, b"  body \n").unwrap(), "body");
    }

    #[test]
    fn extracts_text_from_every_pdf_page() {
        let bytes = pdf_bytes(&["The grace period is thirty days.", "", "Cataract surgery is covered."]);
        assert_eq!(DocumentFormat::sniff(&bytes), Some(DocumentFormat::Pdf));

        let text = extract_text(DocumentFormat::Pdf, &bytes).unwrap();
        assert!(text.contains("grace period is thirty days"));
        assert!(text.contains("Cataract surgery"));
        assert!(text.find("grace").unwrap() < text.find("Cataract").unwrap());
    }

    #[test]
    fn pdf_without_text_is_empty() {
        let bytes = pdf_bytes(&["", ""]);
        assert!(matches!(extract_text(DocumentFormat::Pdf, &bytes), Err(LoadError::Empty)));
    }
}
