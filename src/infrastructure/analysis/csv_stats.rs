//! Column statistics for delimited text files

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::tool::{AnalysisTool, ToolContext, ToolOutcome, ToolParameter, ToolSpec};
use crate::domain::DomainError;

pub const CSV_STATS_TOOL_ID: &str = "csv_stats";

/// Count, mean, min and max of every numeric column
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvStatsTool;

#[derive(Debug, Default)]
struct ColumnStats {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
    skipped: usize,
}

impl ColumnStats {
    fn push(&mut self, cell: &str) {
        match cell.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => {
                if self.count == 0 {
                    self.min = v;
                    self.max = v;
                } else {
                    self.min = self.min.min(v);
                    self.max = self.max.max(v);
                }
                self.count += 1;
                self.sum += v;
            }
            _ => self.skipped += 1,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "count": self.count,
            "mean": self.sum / self.count as f64,
            "min": self.min,
            "max": self.max,
        })
    }
}

#[async_trait]
impl AnalysisTool for CsvStatsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            id: CSV_STATS_TOOL_ID.to_string(),
            name: "CSV column statistics".to_string(),
            version: "1.0.0".to_string(),
            description: "Summarises the numeric columns of a CSV file".to_string(),
            input_types: vec!["csv".to_string(), "txt".to_string()],
            parameters: vec![ToolParameter {
                name: "delimiter".to_string(),
                param_type: "string".to_string(),
                required: false,
                default: Some(json!(",")),
                description: "Field separator".to_string(),
            }],
            outputs: vec!["columns".to_string(), "rows".to_string()],
        }
    }

    async fn run(&self, ctx: &ToolContext) -> Result<ToolOutcome, DomainError> {
        let delimiter = ctx
            .parameter("delimiter")
            .and_then(Value::as_str)
            .unwrap_or(",");

        if delimiter.is_empty() {
            return Ok(ToolOutcome::failed("delimiter cannot be empty"));
        }

        let Ok(text) = std::str::from_utf8(&ctx.data) else {
            return Ok(ToolOutcome::failed("File is not valid UTF-8 text"));
        };

        let mut lines = text.lines().filter(|line| !line.trim().is_empty());
        let Some(header) = lines.next() else {
            return Ok(ToolOutcome::failed("File is empty"));
        };

        let names: Vec<&str> = header.split(delimiter).map(str::trim).collect();
        let mut stats: Vec<ColumnStats> = names.iter().map(|_| ColumnStats::default()).collect();
        let mut rows = 0usize;

        for line in lines {
            rows += 1;
            for (column, cell) in stats.iter_mut().zip(line.split(delimiter)) {
                column.push(cell);
            }
        }

        let mut columns = Map::new();
        let mut outcome_warnings = Vec::new();

        for (name, column) in names.iter().zip(&stats) {
            if column.count == 0 {
                continue;
            }
            if column.skipped > 0 {
                outcome_warnings.push(format!(
                    "{} non-numeric value(s) ignored in column {}",
                    column.skipped, name
                ));
            }
            columns.insert(name.to_string(), column.to_json());
        }

        let numeric = columns.len();
        let mut output = Map::new();
        output.insert("rows".to_string(), json!(rows));
        output.insert("columns".to_string(), Value::Object(columns.clone()));

        let mut outcome = ToolOutcome::completed(output)
            .with_conclusion(format!(
                "{} rows, {} numeric column(s) summarised",
                rows, numeric
            ))
            .with_annotation(json!({"columns": columns}));

        for warning in outcome_warnings {
            outcome = outcome.with_warning(warning);
        }

        Ok(outcome)
    }
}
