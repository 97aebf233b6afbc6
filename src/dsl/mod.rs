//! Graph description shapes and the JSON entry point that produces them.

pub mod parser;
pub mod schema;

pub use parser::parse_graph;
pub use schema::*;
