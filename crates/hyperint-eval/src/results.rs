//! Accuracy tables and their summaries.
//!
//! Delimited output follows the layout of a pandas `DataFrame.to_csv`: a
//! leading unnamed row-index column, a header row, floats printed with at
//! least one decimal and list cells as `[a, b, c]`.

use hyperint_core::{HyperintError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Accuracy of one evaluated task, both in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskAccuracy {
    pub task: usize,
    pub task_prediction_acc: f64,
    pub class_prediction_acc: f64,
}

impl TaskAccuracy {
    pub const COLUMNS: [&'static str; 3] = ["task", "task_prediction_acc", "class_prediction_acc"];
}

/// A task whose evaluation failed while failures were being isolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task: usize,
    pub error: String,
}

/// Result table of one model: one row per evaluated task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub rows: Vec<TaskAccuracy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<TaskFailure>,
}

impl ResultTable {
    pub fn push(&mut self, row: TaskAccuracy) {
        self.rows.push(row);
    }

    pub fn task_accuracies(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.task_prediction_acc).collect()
    }

    pub fn class_accuracies(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.class_prediction_acc).collect()
    }

    pub fn to_delimited(&self, delimiter: char) -> String {
        let mut out = String::new();
        write_header(&mut out, &TaskAccuracy::COLUMNS, delimiter);
        for (idx, row) in self.rows.iter().enumerate() {
            let cells = [
                row.task.to_string(),
                format_float(row.task_prediction_acc),
                format_float(row.class_prediction_acc),
            ];
            write_row(&mut out, idx, &cells, delimiter);
        }
        out
    }

    pub fn write_delimited(&self, path: &Path, delimiter: char) -> Result<()> {
        fs::write(path, self.to_delimited(delimiter))?;
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json().map_err(std::io::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Per-model summary over all evaluated tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub task_prediction_accuracy: Vec<f64>,
    pub class_prediction_accuracy: Vec<f64>,
    pub mean_task_prediction_accuracy: f64,
    pub std_dev_task_prediction_accuracy: f64,
    pub mean_class_prediction_accuracy: f64,
    pub std_dev_class_prediction_accuracy: f64,
}

impl ModelSummary {
    pub const COLUMNS: [&'static str; 6] = [
        "task_prediction_accuracy",
        "class_prediction_accuracy",
        "mean_task_prediction_accuracy",
        "std_dev_task_prediction_accuracy",
        "mean_class_prediction_accuracy",
        "std_dev_class_prediction_accuracy",
    ];

    /// Fails on a table without rows, e.g. when every task of the model
    /// failed under failure isolation.
    pub fn from_table(table: &ResultTable) -> Result<Self> {
        let task = table.task_accuracies();
        let class = table.class_accuracies();
        let (Some(mean_task), Some(std_task), Some(mean_class), Some(std_class)) = (
            mean(&task),
            population_std(&task),
            mean(&class),
            population_std(&class),
        ) else {
            return Err(HyperintError::InvalidSpec(format!(
                "Cannot summarise a result table without rows ({} failed tasks)",
                table.failures.len()
            )));
        };
        Ok(Self {
            task_prediction_accuracy: task,
            class_prediction_accuracy: class,
            mean_task_prediction_accuracy: mean_task,
            std_dev_task_prediction_accuracy: std_task,
            mean_class_prediction_accuracy: mean_class,
            std_dev_class_prediction_accuracy: std_class,
        })
    }
}

/// Summaries of every model evaluated at one alpha.
pub fn summaries_to_delimited(summaries: &[ModelSummary], delimiter: char) -> String {
    let mut out = String::new();
    write_header(&mut out, &ModelSummary::COLUMNS, delimiter);
    for (idx, s) in summaries.iter().enumerate() {
        let cells = [
            format_list(&s.task_prediction_accuracy),
            format_list(&s.class_prediction_accuracy),
            format_float(s.mean_task_prediction_accuracy),
            format_float(s.std_dev_task_prediction_accuracy),
            format_float(s.mean_class_prediction_accuracy),
            format_float(s.std_dev_class_prediction_accuracy),
        ];
        write_row(&mut out, idx, &cells, delimiter);
    }
    out
}

/// Cross-model result of one alpha: mean and spread of the per-model mean
/// class accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaSummary {
    pub alpha: f32,
    pub final_mean: f64,
    pub final_stdev: f64,
}

impl AlphaSummary {
    pub const COLUMNS: [&'static str; 3] = ["alpha", "final_mean", "final_stdev"];

    /// Models whose mean class accuracy is not finite are left out; at
    /// least one model must remain.
    pub fn from_models(alpha: f32, summaries: &[ModelSummary]) -> Result<Self> {
        let means: Vec<f64> = summaries
            .iter()
            .map(|s| s.mean_class_prediction_accuracy)
            .filter(|m| m.is_finite())
            .collect();
        match (mean(&means), population_std(&means)) {
            (Some(final_mean), Some(final_stdev)) => Ok(Self {
                alpha,
                final_mean,
                final_stdev,
            }),
            _ => Err(HyperintError::InvalidSpec(format!(
                "No model summary with a finite mean at alpha {}",
                alpha
            ))),
        }
    }

    pub fn to_delimited(&self, delimiter: char) -> String {
        let mut out = String::new();
        write_header(&mut out, &Self::COLUMNS, delimiter);
        let cells = [
            format!("{:?}", self.alpha),
            format_float(self.final_mean),
            format_float(self.final_stdev),
        ];
        write_row(&mut out, 0, &cells, delimiter);
        out
    }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`); `None` for an empty slice.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

fn format_float(v: f64) -> String {
    format!("{:?}", v)
}

fn format_list(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format_float(*v)).collect();
    format!("[{}]", items.join(", "))
}

fn write_header(out: &mut String, columns: &[&str], delimiter: char) {
    for column in columns {
        out.push(delimiter);
        out.push_str(column);
    }
    out.push('\n');
}

fn write_row(out: &mut String, index: usize, cells: &[String], delimiter: char) {
    let _ = write!(out, "{}", index);
    for cell in cells {
        out.push(delimiter);
        out.push_str(cell);
    }
    out.push('\n');
}
