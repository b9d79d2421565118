use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),

    #[error("PDF text extraction failed: {0}")]
    Pdf(String),

    #[error("document contains no extractable text")]
    Empty,
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "html", "htm", "log", "yaml", "yml",
];

fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Best-effort MIME type from a file extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("log") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("html") | Some("htm") => "text/html",
        Some("yaml") | Some("yml") => "application/yaml",
        _ => "application/octet-stream",
    }
}

/// Client-declared type unless it is missing or the generic octet-stream.
pub fn effective_content_type(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => guess_content_type(filename).to_string(),
    }
}

fn is_pdf(content_type: &str, filename: &str) -> bool {
    content_type.starts_with("application/pdf") || extension(filename).as_deref() == Some("pdf")
}

fn is_text_like(content_type: &str, filename: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("json")
        || ct.contains("xml")
        || ct.contains("csv")
        || ct.contains("markdown")
        || ct.contains("yaml")
        || extension(filename).is_some_and(|e| TEXT_EXTENSIONS.contains(&e.as_str()))
}

/// Extracts plain text. PDFs go through `pdf-extract`; text-like content is
/// decoded as UTF-8, replacing invalid sequences.
pub fn extract_text(
    data: &[u8],
    content_type: Option<&str>,
    filename: &str,
) -> Result<String, ExtractError> {
    let content_type = content_type.unwrap_or_default();

    let text = if is_pdf(content_type, filename) {
        pdf_extract::extract_text_from_mem(data).map_err(|e| ExtractError::Pdf(e.to_string()))?
    } else if is_text_like(content_type, filename) {
        String::from_utf8_lossy(data).into_owned()
    } else {
        let shown = if content_type.is_empty() {
            filename
        } else {
            content_type
        };
        return Err(ExtractError::Unsupported(shown.to_string()));
    };

    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("a.PDF"), "application/pdf");
        assert_eq!(guess_content_type("notes.md"), "text/markdown");
        assert_eq!(guess_content_type("archive.zip"), "application/octet-stream");
        assert_eq!(guess_content_type(".bashrc"), "application/octet-stream");
    }

    #[test]
    fn test_effective_content_type_prefers_declared() {
        assert_eq!(effective_content_type(Some("text/csv"), "a.bin"), "text/csv");
        assert_eq!(
            effective_content_type(Some("application/octet-stream"), "a.json"),
            "application/json"
        );
        assert_eq!(effective_content_type(None, "a.txt"), "text/plain");
    }

    #[test]
    fn test_text_like_is_decoded_lossily() {
        let text = extract_text(b"hello \xff world", Some("text/plain"), "a.txt").unwrap();
        assert!(text.starts_with("hello "));
        assert!(text.ends_with(" world"));
    }

    #[test]
    fn test_text_by_extension_without_content_type() {
        let text = extract_text(b"{\"a\":1}", None, "data.json").unwrap();
        assert_eq!(text, "{\"a\":1}");
    }

    #[test]
    fn test_binary_is_unsupported() {
        let err = extract_text(&[0, 1, 2], Some("image/png"), "a.png").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ref ct) if ct == "image/png"));
    }

    #[test]
    fn test_blank_text_is_empty() {
        let err = extract_text(b"  \n\t ", Some("text/plain"), "a.txt").unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }

    #[test]
    fn test_garbage_pdf_fails() {
        let err = extract_text(b"not a pdf", Some("application/pdf"), "a.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
