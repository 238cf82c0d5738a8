//! Formatters for command results
//!
//! Supports text and JSON output formats.

use serde::Serialize;

use forest_io::tree::FileSlice;
use forest_io::{ForestInfo, RunSummary, TaskContext};

/// How `partition` prints its report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    /// Aligned, human-readable lines
    #[default]
    #[value(alias = "txt")]
    Text,
    /// Pretty-printed JSON of the whole report
    Json,
}

#[derive(Debug, Serialize)]
pub struct PartitionReport {
    pub task: usize,
    pub ntasks: usize,
    pub totnforests: i64,
    pub nforests: i64,
    pub frac_volume_processed: f64,
    pub files: Vec<FileSlice>,
}

impl PartitionReport {
    pub fn new(task: TaskContext, info: &ForestInfo) -> Self {
        Self {
            task: task.this_task,
            ntasks: task.ntasks,
            totnforests: info.totnforests,
            nforests: info.nforests_this_task,
            frac_volume_processed: info.frac_volume_processed,
            files: info.files.clone(),
        }
    }
}

/// Format the forests one task owns
pub fn format_partition(report: &PartitionReport, format: ReportFormat) -> String {
    match format {
        ReportFormat::Text => format_partition_text(report),
        ReportFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
    }
}

fn format_partition_text(report: &PartitionReport) -> String {
    let mut output = String::new();

    output.push_str(&format!("Task:    {} of {}\n", report.task, report.ntasks));
    output.push_str(&format!(
        "Forests: {} of {}\n",
        report.nforests, report.totnforests
    ));
    output.push_str(&format!("Volume:  {:.6}\n", report.frac_volume_processed));
    output.push_str("\nFiles:\n");
    for slice in &report.files {
        let forests = slice.forests();
        output.push_str(&format!(
            "  {:>5}  forests [{}, {}) of {}\n",
            slice.filenr, forests.start, forests.end, slice.nforests_in_file
        ));
    }

    output
}

/// Format the outcome of a completed task
pub fn format_summary(summary: &RunSummary) -> String {
    format!(
        "Forests: {}\nGalaxies: {}\nVolume:  {:.6}\n",
        summary.forests_processed, summary.galaxies_written, summary.frac_volume_processed
    )
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn report() -> PartitionReport {
        PartitionReport {
            task: 1,
            ntasks: 2,
            totnforests: 8,
            nforests: 4,
            frac_volume_processed: 1.0,
            files: vec![FileSlice {
                filenr: 1,
                nforests_in_file: 3,
                first_forest: 0,
                nforests: 3,
            }],
        }
    }

    #[test]
    fn test_report_format__value_names__then_text_json_and_alias() {
        use clap::ValueEnum;

        assert_eq!(ReportFormat::from_str("json", false), Ok(ReportFormat::Json));
        assert_eq!(ReportFormat::from_str("JSON", true), Ok(ReportFormat::Json));
        assert_eq!(ReportFormat::from_str("txt", false), Ok(ReportFormat::Text));
        assert!(ReportFormat::from_str("yaml", true).is_err());
    }

    #[test]
    fn test_format_partition__text__then_lists_files() {
        let text = format_partition(&report(), ReportFormat::Text);
        assert!(text.contains("Task:    1 of 2"));
        assert!(text.contains("Forests: 4 of 8"));
        assert!(text.contains("forests [0, 3) of 3"));
    }

    #[test]
    fn test_format_partition__json__then_parseable() {
        let json = format_partition(&report(), ReportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nforests"], 4);
        assert_eq!(value["files"][0]["filenr"], 1);
    }
}
