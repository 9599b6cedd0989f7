//! Retrieval: FTS and vector adapters plus the hybrid RRF ranker.
//!
//! The adapters are deliberately thin - empty queries return empty results
//! and failures are logged and swallowed, so retrieval never raises below
//! the tool boundary.

mod fts;
mod hybrid;
mod vector;

pub use fts::fts_search;
pub use hybrid::{hybrid_search, reciprocal_rank_fusion, RRF_K};
pub use vector::vector_search;
