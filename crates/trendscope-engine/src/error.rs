use thiserror::Error;
use trendscope_core::ConfigError;

use crate::classify::SignalRejection;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("signal queue is full ({capacity} pending)")]
    SignalQueueFull { capacity: usize },

    #[error(transparent)]
    Signal(#[from] SignalRejection),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
