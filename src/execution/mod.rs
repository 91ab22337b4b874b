// Order orchestration module
pub mod position_manager;

pub use position_manager::{ExecutionConfig, PositionManager, TradeError};
