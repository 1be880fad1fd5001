//! sente-mcts: concurrent PUCT tree search for AlphaZero-style play.
//!
//! The design uses:
//! - One shared tree per search; per-node compare-and-swap expansion
//!   claims instead of any tree-wide lock
//! - Lazy child handles that inflate to full nodes on first selection,
//!   gated by progressive widening
//! - Virtual loss so concurrent workers diversify across branches
//! - Race-tolerant atomic statistics (Welford variance, Student-t LCB)

pub mod config;
pub mod eval;
pub mod node;
pub mod search;
pub mod stats;

pub use config::{ConfigError, SearchConfig, ThinkBudget};
pub use eval::{EvalError, Evaluator, NetOutput, UniformEvaluator};
pub use node::{Edge, ExpandState, Node, NodeStatus, LCB_SENTINEL};
pub use search::{CandidateLine, Search, SearchError, SearchStats, SearchSummary, StopHandle};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
