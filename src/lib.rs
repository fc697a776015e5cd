//! # Churchbook Core
//!
//! Reconciliation engine for church bookkeeping: matches imported bank
//! ledger lines against income and expense records.
//!
//! ## Features
//!
//! - **Pattern matching**: deterministic substring/token ranking of learned rules
//! - **Auto-matching**: pending lines sorted into auto-matched, suppressed and needs-review
//! - **Duplicate prevention**: live status re-check before every write
//! - **Batch confirmation**: independent income, expense and suppression sub-batches
//!   with per-sub-batch partial success
//! - **Cash offerings**: lump-sum deposits reconciled against attributed cash entries
//! - **Storage abstraction**: trait-based collaborators for any backing store
//!
//! ## Quick Start
//!
//! ```rust
//! use churchbook_core::utils::MemoryStore;
//! use churchbook_core::{MatchingConfig, ReconciliationEngine};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let engine = ReconciliationEngine::new(store, MatchingConfig::default()).unwrap();
//!
//! let classification = engine.classify(None).await.unwrap();
//! let summary = engine
//!     .confirm(&classification.auto_confirmations("treasurer"))
//!     .await;
//! assert!(!summary.success);
//! # });
//! ```

pub mod config;
pub mod matching;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::MatchingConfig;
pub use matching::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;

pub use utils::init_tracing;
