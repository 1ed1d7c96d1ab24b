//! State module for articles and sources
//!
//! # Components
//!
//! - `ArticleStatus`: triage state of a captured article and its transition table
//! - `SourceState`: per-source rate-limit strikes and failure streaks

mod article_status;
mod source_state;

// Re-export main types
pub use article_status::ArticleStatus;
pub use source_state::SourceState;
