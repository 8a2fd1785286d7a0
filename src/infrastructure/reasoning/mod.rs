//! Reasoning chain execution

pub mod cache;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod retry;
pub mod scheduler;

pub use cache::ResultCache;
pub use engine::{default_worker_count, EngineSettings, ReasoningEngine, RunOptions};
pub use executor::{BuiltinHandler, NodeExecutor, NodeHandler};
pub use handlers::{HandlerContext, HandlerError, HandlerResult};
pub use retry::{execute_with_retry, execute_with_timeout, AttemptMode};
pub use scheduler::{Halt, ScheduleOutcome, Scheduler};
