//! LLM-driven application code generation.
//!
//! Prompt construction, response parsing and the bounded
//! generate-check-repair loop.

pub mod prompts;
pub mod repair_loop;
pub mod response;

pub use repair_loop::{
    BasicChecks, CheckResult, CheckRunner, ExhaustionReason, LoopOutcome, RepairLoop,
};
pub use response::{parse_file_response, GeneratedFile, ParsedResponse};
