//! Analysis tools run against LabFlow files

mod csv_stats;
mod registry;
mod tool;

pub use csv_stats::{CsvStatsTool, CSV_STATS_TOOL_ID};
pub use registry::AnalysisToolRegistry;
pub use tool::{AnalysisTool, ToolContext, ToolOutcome, ToolParameter, ToolSpec, ToolStatus};
