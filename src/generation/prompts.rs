//! Prompt construction for the generation-repair loop.
//!
//! Draft prompts carry the task brief, the declared checks and an
//! attachment listing with text attachments inlined. Repair prompts
//! additionally embed the failing checks and the prior draft so each
//! attempt builds on the last one's results.

use crate::attachments::MaterializedFile;
use crate::task::TaskSubmission;

use super::repair_loop::CheckResult;
use super::response::GeneratedFile;

/// System prompt for application code generation.
pub const SYSTEM_PROMPT: &str = r#"You are an expert full-stack developer producing complete, working web applications.

## Response format
1. Respond with ONLY a <files> block containing one <file> element per generated file.
2. Each <file> has a path attribute; wrap text content in CDATA sections and mark binary content with encoding="base64".
3. Include a file named "commit_message" containing a one-line commit message.
4. Do NOT return a LICENSE file or any attachment that was provided to you.
5. Do NOT emit any text outside the <files> block; the response is parsed mechanically.

## Code quality
- Write complete code with no placeholder comments.
- Load third-party libraries from CDNs with plain <script>/<link> tags.
- Include a README.md with setup and usage instructions."#;

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return " - None".to_string();
    }
    items
        .iter()
        .map(|item| format!(" - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn attachment_listing(attachments: &[MaterializedFile]) -> String {
    bullet_list(
        &attachments
            .iter()
            .map(|a| format!("path: {}, mime_type: {}", a.name, a.mime))
            .collect::<Vec<_>>(),
    )
}

fn inline_text_attachments(attachments: &[MaterializedFile]) -> String {
    let mut blocks = String::from("<attachments>\n");
    for att in attachments.iter().filter(|a| a.is_text()) {
        if let Some(text) = att.text() {
            blocks.push_str(&format!(
                "<attachment name=\"{}\" mime=\"{}\"><![CDATA[{}]]></attachment>\n",
                att.name, att.mime, text
            ));
        }
    }
    blocks.push_str("</attachments>");
    blocks
}

/// Builds the initial draft prompt for a generation round.
///
/// `prior_instructions` is the previous round's instructions file, when
/// the repository already carries one.
pub fn draft_prompt(
    submission: &TaskSubmission,
    attachments: &[MaterializedFile],
    prior_instructions: Option<&str>,
) -> String {
    let mut prompt = format!(
        "## Task\n - Create a static website deployable as-is from the repository root.\n\n\
         ## Task brief\n{brief}\n\n\
         ## Checks - the result will be evaluated against these\n{checks}\n\n\
         ## Input attachments available in the repository\n{attachments}\n\n\
         ## Content of text attachments\n{attachment_text}\n",
        brief = bullet_list(&[submission.brief.trim().to_string()]),
        checks = bullet_list(&submission.checks),
        attachments = attachment_listing(attachments),
        attachment_text = inline_text_attachments(attachments),
    );

    if let Some(instructions) = prior_instructions {
        prompt.push_str(&format!(
            "\n## Instructions from the previous round\n{}\n",
            instructions
        ));
    }

    prompt.push_str(
        "\n## Output\n - Return the website's code files and README.md\n \
         - Return a file \"commit_message\" with an appropriate commit message\n \
         - Do NOT return LICENSE or any provided attachment\n",
    );
    prompt
}

/// Builds a repair prompt from the failing checks and the prior draft.
pub fn repair_prompt(
    submission: &TaskSubmission,
    failures: &[CheckResult],
    prior_files: &[GeneratedFile],
) -> String {
    let failure_lines = bullet_list(
        &failures
            .iter()
            .map(|f| match &f.message {
                Some(msg) => format!("{}: {}", f.check_name, msg),
                None => f.check_name.clone(),
            })
            .collect::<Vec<_>>(),
    );

    let mut prior = String::from("<files>\n");
    for file in prior_files {
        match String::from_utf8(file.content.clone()) {
            Ok(text) => prior.push_str(&format!(
                "<file path=\"{}\"><![CDATA[{}]]></file>\n",
                file.path, text
            )),
            // Binary files are listed by path only.
            Err(_) => prior.push_str(&format!("<file path=\"{}\"/>\n", file.path)),
        }
    }
    prior.push_str("</files>");

    format!(
        "## Task\n - Repair the website below so that all checks pass.\n \
         - Only change what is required; do not break working functionality.\n\n\
         ## Task brief\n{brief}\n\n\
         ## Failing checks\n{failures}\n\n\
         ## Current state of the generated files\n{prior}\n\n\
         ## Output\n - Return the full corrected file set in the same <files> format\n \
         - Return a file \"commit_message\" with an appropriate commit message\n",
        brief = bullet_list(&[submission.brief.trim().to_string()]),
        failures = failure_lines,
        prior = prior,
    )
}
