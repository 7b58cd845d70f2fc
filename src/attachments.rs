//! Attachment materialization: data URI decoding and name sanitizing.
//!
//! A pure transform from submitted attachments to named byte blobs.
//! Writing the blobs into a working tree is the caller's concern.

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use tracing::warn;

use crate::error::AttachmentError;
use crate::task::Attachment;

/// Grammar of the data URI header: `data:[<mime>][;charset=...][;base64],`
static DATA_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:(?P<mime>[\w\-/+.]+)?(;charset=[\w\-]+)?(?P<b64>;base64)?,")
        .expect("valid data URI regex")
});

/// What to do when an attachment fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPolicy {
    /// Abort the task on the first undecodable attachment.
    Fatal,
    /// Log the failure, skip the attachment, materialize the rest.
    SkipAndLog,
}

/// A decoded attachment ready for filesystem placement.
#[derive(Debug, Clone)]
pub struct MaterializedFile {
    /// Sanitized, path-safe file name.
    pub name: String,
    /// Decoded content bytes.
    pub content: Vec<u8>,
    /// MIME type parsed from the data URI header.
    pub mime: String,
}

impl MaterializedFile {
    /// Whether the attachment carries a text MIME type.
    pub fn is_text(&self) -> bool {
        self.mime.starts_with("text/")
    }

    /// Content as UTF-8 text, if valid.
    pub fn text(&self) -> Option<String> {
        String::from_utf8(self.content.clone()).ok()
    }
}

/// Decodes a data URI into bytes and its MIME type.
///
/// Base64 payloads are decoded; plain payloads are taken as raw UTF-8
/// text. The MIME type defaults to `application/octet-stream`.
pub fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String), String> {
    let caps = DATA_URI_RE
        .captures(uri)
        .ok_or_else(|| "not a well-formed data URI".to_string())?;

    let mime = caps
        .name("mime")
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let is_base64 = caps.name("b64").is_some();

    // Split on the first comma; the regex guarantees one exists.
    let payload = match uri.split_once(',') {
        Some((_, data)) => data,
        None => return Err("missing payload separator".to_string()),
    };

    let bytes = if is_base64 {
        BASE64
            .decode(payload)
            .map_err(|e| format!("invalid base64 payload: {}", e))?
    } else {
        // Plain payloads are percent-encoded per RFC 2397.
        urlencoding::decode(payload)
            .map_err(|e| format!("invalid percent-encoding: {}", e))?
            .into_owned()
            .into_bytes()
    };

    Ok((bytes, mime))
}

/// Reduces an attachment name to a safe file name.
///
/// Keeps the final path component only; rejects empty names and
/// traversal components.
pub fn sanitize_name(name: &str) -> Result<String, AttachmentError> {
    let candidate = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(AttachmentError::UnsafeName(name.to_string()));
    }

    Ok(candidate)
}

/// Materializes attachments into an ordered sequence of decoded files.
///
/// Under `AttachmentPolicy::Fatal` the first undecodable attachment
/// aborts with `AttachmentError` naming it. Under
/// `AttachmentPolicy::SkipAndLog` failures are logged and skipped and
/// the remaining attachments are still materialized.
pub fn materialize(
    attachments: &[Attachment],
    policy: AttachmentPolicy,
) -> Result<Vec<MaterializedFile>, AttachmentError> {
    let mut files = Vec::with_capacity(attachments.len());

    for attachment in attachments {
        let result = materialize_one(attachment);
        match result {
            Ok(file) => files.push(file),
            Err(err) => match policy {
                AttachmentPolicy::Fatal => return Err(err),
                AttachmentPolicy::SkipAndLog => {
                    warn!(
                        attachment = %err.attachment_name(),
                        error = %err,
                        "Skipping undecodable attachment"
                    );
                }
            },
        }
    }

    Ok(files)
}

fn materialize_one(attachment: &Attachment) -> Result<MaterializedFile, AttachmentError> {
    let name = sanitize_name(&attachment.name)?;

    if !attachment.url.starts_with("data:") {
        return Err(AttachmentError::NotDataUri {
            name: attachment.name.clone(),
        });
    }

    let (content, mime) =
        decode_data_uri(&attachment.url).map_err(|reason| AttachmentError::Decode {
            name: attachment.name.clone(),
            reason,
        })?;

    Ok(MaterializedFile {
        name,
        content,
        mime,
    })
}
