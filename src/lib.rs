pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use crate::config::AppConfig;
pub use crate::core::classify::{classify, Category};
pub use crate::core::engine::{EngineParams, StatsEngine};
pub use crate::core::fifo::{match_trades, FifoMatcher, InventoryEntry, MatchOutcome, Roundtrip};
pub use crate::core::report::{Report, Rounding};
pub use crate::core::windows::partition;
pub use crate::error::{StatsError, Warning};
pub use crate::types::{InstrumentSpec, Money, Operation, Side, Trade, Window, WindowKind};
