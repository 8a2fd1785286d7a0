//! Infrastructure layer - collaborator implementations and the execution engine

pub mod analysis;
pub mod blob;
pub mod database;
pub mod execution;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod reasoning;
