//! Parsing of LLM file-set responses.
//!
//! The model is instructed to answer with a `<files>` block of
//! `<file path="...">` elements, CDATA-wrapped text and base64-marked
//! binary content. Parsing is tolerant of commentary around the block;
//! everything outside `<file>` elements is ignored.

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use tracing::warn;

/// Matches one `<file ...>...</file>` element, attributes and body.
static FILE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<file\s+path="(?P<path>[^"]+)"(?P<attrs>[^>]*)>(?P<body>.*?)</file>"#)
        .expect("valid file block regex")
});

/// A file produced by the LLM, ready for the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the repository root.
    pub path: String,
    /// File content bytes.
    pub content: Vec<u8>,
}

/// A parsed LLM response.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    /// Files to write into the working tree.
    pub files: Vec<GeneratedFile>,
    /// Commit message extracted from the generated `commit_message`
    /// file, when present.
    pub commit_message: Option<String>,
}

/// Parses an LLM response into a file set.
///
/// - a generated `commit_message` file becomes the commit message
///   instead of a tree entry;
/// - generated `LICENSE` files are discarded (the scaffold's license is
///   authoritative);
/// - absolute or traversal paths are skipped with a warning.
pub fn parse_file_response(text: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();

    for caps in FILE_BLOCK_RE.captures_iter(text) {
        let path = caps["path"].trim().to_string();
        let attrs = &caps["attrs"];
        let body = strip_cdata(caps["body"].trim());

        if !is_safe_path(&path) {
            warn!(path = %path, "Skipping generated file with unsafe path");
            continue;
        }

        let file_name = path.rsplit('/').next().unwrap_or(&path);
        if file_name == "LICENSE" {
            continue;
        }
        if file_name == "commit_message" {
            parsed.commit_message = Some(body.trim().to_string());
            continue;
        }

        let content = if attrs.contains("encoding=\"base64\"") {
            match BASE64.decode(body.trim()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping file with invalid base64 content");
                    continue;
                }
            }
        } else {
            body.into_bytes()
        };

        parsed.files.push(GeneratedFile { path, content });
    }

    parsed
}

/// Rejects absolute paths and traversal components.
fn is_safe_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') || path.contains(':') {
        return false;
    }
    !path
        .split(['/', '\\'])
        .any(|component| component.is_empty() || component == "..")
}

/// Strips a single CDATA wrapper if present.
fn strip_cdata(body: &str) -> String {
    let trimmed = body.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
    {
        inner.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_files() {
        let response = r#"<files>
<file path="index.html"><![CDATA[<h1>Hello</h1>]]></file>
<file path="js/app.js"><![CDATA[console.log("hi");]]></file>
</files>"#;
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.files[0].path, "index.html");
        assert_eq!(parsed.files[0].content, b"<h1>Hello</h1>");
        assert_eq!(parsed.files[1].path, "js/app.js");
    }

    #[test]
    fn test_parse_base64_file() {
        let response = r#"<files>
<file path="logo.png" encoding="base64">AAAA</file>
</files>"#;
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, vec![0u8, 0, 0]);
    }

    #[test]
    fn test_commit_message_extracted_not_written() {
        let response = r#"<files>
<file path="index.html"><![CDATA[<h1>x</h1>]]></file>
<file path="commit_message"><![CDATA[Add landing page]]></file>
</files>"#;
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.commit_message.as_deref(), Some("Add landing page"));
    }

    #[test]
    fn test_license_discarded() {
        let response = r#"<files>
<file path="LICENSE"><![CDATA[MIT]]></file>
<file path="index.html"><![CDATA[x]]></file>
</files>"#;
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "index.html");
    }

    #[test]
    fn test_unsafe_paths_skipped() {
        let response = r#"<files>
<file path="../escape.sh"><![CDATA[rm -rf /]]></file>
<file path="/etc/passwd"><![CDATA[x]]></file>
<file path="ok.txt"><![CDATA[fine]]></file>
</files>"#;
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "ok.txt");
    }

    #[test]
    fn test_commentary_outside_block_ignored() {
        let response = "Sure! Here are the files:\n<files><file path=\"a.txt\">hello</file></files>\nLet me know!";
        let parsed = parse_file_response(response);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].content, b"hello");
    }

    #[test]
    fn test_empty_response_yields_no_files() {
        let parsed = parse_file_response("I could not generate anything.");
        assert!(parsed.files.is_empty());
        assert!(parsed.commit_message.is_none());
    }
}
