//! Round routing and working-tree writers.
//!
//! Round 1 scaffolds the repository (instructions, license,
//! attachments) with no LLM involvement; later rounds run the
//! generation-repair loop. The round is classified before any
//! provisioning side effect so a bad round number never leaves a
//! half-created repository.

use std::path::Path;

use chrono::{Datelike, Utc};
use tracing::debug;

use crate::attachments::MaterializedFile;
use crate::error::RoundError;
use crate::generation::GeneratedFile;
use crate::task::TaskSubmission;

/// Fixed scaffold artifact: the task instructions file.
pub const INSTRUCTIONS_FILE: &str = "instructions.txt";

/// Fixed scaffold artifact: the license file.
pub const LICENSE_FILE: &str = "LICENSE";

const LICENSE_TEMPLATE: &str = r#"MIT License

Copyright (c) [year] [fullname]

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
"#;

/// Closed dispatch over the round classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundHandler {
    /// Round 1: instructions, license and attachments only.
    Scaffold,
    /// Round > 1: generation-repair loop against the existing repository.
    Generation,
}

impl RoundHandler {
    /// Classifies a round number.
    ///
    /// # Errors
    ///
    /// Returns `RoundError::Unsupported` for round 0.
    pub fn for_round(round: u32) -> Result<Self, RoundError> {
        match round {
            0 => Err(RoundError::Unsupported(round)),
            1 => Ok(RoundHandler::Scaffold),
            _ => Ok(RoundHandler::Generation),
        }
    }
}

/// Writes the scaffold artifacts into the working tree.
///
/// Idempotent: re-running for the same task overwrites rather than
/// duplicates.
pub async fn write_scaffold(
    repo_path: &Path,
    submission: &TaskSubmission,
    attachments: &[MaterializedFile],
) -> std::io::Result<()> {
    let instructions = render_instructions(submission);
    tokio::fs::write(repo_path.join(INSTRUCTIONS_FILE), instructions).await?;

    let license = LICENSE_TEMPLATE
        .replace("[year]", &Utc::now().year().to_string())
        .replace("[fullname]", "repoforge");
    tokio::fs::write(repo_path.join(LICENSE_FILE), license).await?;

    // Raw LLM transcripts are saved next to the tree but never pushed.
    tokio::fs::write(repo_path.join(".gitignore"), ".llm_transcript*\n").await?;

    write_attachments(repo_path, attachments).await?;

    debug!(path = %repo_path.display(), "Wrote scaffold");
    Ok(())
}

/// Writes decoded attachments into the working tree.
pub async fn write_attachments(
    repo_path: &Path,
    attachments: &[MaterializedFile],
) -> std::io::Result<()> {
    for attachment in attachments {
        tokio::fs::write(repo_path.join(&attachment.name), &attachment.content).await?;
    }
    Ok(())
}

/// Writes generated files into the working tree, creating parent
/// directories as needed. Paths are already sanitized at parse time.
pub async fn write_generated(repo_path: &Path, files: &[GeneratedFile]) -> std::io::Result<()> {
    for file in files {
        let target = repo_path.join(&file.path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, &file.content).await?;
    }
    Ok(())
}

/// Reads the previous round's instructions file, if present.
pub fn read_prior_instructions(repo_path: &Path) -> Option<String> {
    std::fs::read_to_string(repo_path.join(INSTRUCTIONS_FILE)).ok()
}

fn render_instructions(submission: &TaskSubmission) -> String {
    let mut lines = vec![
        format!("Task: {}", submission.task),
        String::new(),
        format!("Brief: {}", submission.brief),
        String::new(),
        "Checks:".to_string(),
    ];
    lines.extend(submission.checks.iter().map(|c| format!("- {}", c)));
    lines.join("\n").trim().to_string() + "\n"
}
