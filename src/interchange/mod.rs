//! Graph interchange formats
//!
//! Two serialization forms, both lossless round trips:
//! - `node_link`: JSON document with nodes/links arrays plus shared insight
//!   storage; the primary checkpoint format the store loads at startup.
//! - `graphml`: portable XML export for external graph tooling. The parser
//!   reads the strict single-element-per-line shape this crate's writer
//!   emits; it is an import path for our own checkpoints, not a general
//!   GraphML consumer.

pub mod graphml;
pub mod node_link;
