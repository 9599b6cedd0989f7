//! Safety-gated file ingestion.
//!
//! Files pass a deny-list, an extension allowlist, a size check, secret
//! detection, and PII redaction before any LLM sees their content. The
//! LLM then summarizes the file and extracts structured entries, which flow
//! through the same create/embed/graph pipeline as interactive authoring.

pub mod extractor;
mod ingester;
pub mod safety;

pub use extractor::ExtractedEntry;
pub use ingester::{FileAction, FileIngester, FileResult, IngestResult};
pub use safety::{
    check_deny_list, detect_secrets, is_allowed_file, redact_pii, run_safety_pipeline,
    SafetyAction,
};
