//! Typed property graph over entries.
//!
//! Two layers write edges:
//! - [`GraphBuilder`]: deterministic derivation from entry fields, rebuilt
//!   idempotently on every entry mutation
//! - [`GraphEnricher`]: LLM-extracted entities with a provenance marker, so
//!   re-enrichment replaces prior LLM edges without touching deterministic
//!   ones
//!
//! Traversal and scope resolution live in [`queries`]; the LLM strategy
//! selector in [`planner`].

mod builder;
mod enricher;
pub mod planner;
pub mod queries;

pub use builder::GraphBuilder;
pub use enricher::GraphEnricher;
pub use planner::{QueryPlan, QueryPlanner};
pub use queries::Direction;
