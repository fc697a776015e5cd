//! Rule-based matching of bank lines to ledger codes

pub mod matcher;
pub mod orchestrator;
pub mod rules;

pub use matcher::*;
pub use orchestrator::*;
pub use rules::*;
