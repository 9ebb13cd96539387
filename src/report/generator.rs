//! Markdown and JSON report generation.
//!
//! This module renders an [`EvaluationReport`] for humans (Markdown) or for
//! other tools (JSON), and writes either form to disk.

use crate::analysis::confusions;
use crate::config::ReportConfig;
use crate::models::{ClassAccuracy, EvaluationReport, ReportMetadata, SampleOutcome};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &EvaluationReport, config: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# TTA Evaluation Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Accuracy summary
    output.push_str(&generate_summary_section(report));

    // Per-class breakdown
    output.push_str(&generate_class_section(&report.per_class));

    // Misclassified samples
    output.push_str(&generate_errors_section(report, config.max_listed_errors));

    // Every sample
    if config.include_samples {
        output.push_str(&generate_samples_section(&report.samples));
    }

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Dataset:** `{}`\n",
        metadata.dataset_root.display()
    ));
    section.push_str(&format!(
        "- **Evaluation Date:** {}\n",
        metadata.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Classifier:** `{}`\n", metadata.classifier));
    section.push_str(&format!("- **Group Size:** {}\n", metadata.group_size));
    if metadata.exclude_outliers > 0 {
        section.push_str(&format!(
            "- **Outliers Excluded per Group:** {}\n",
            metadata.exclude_outliers
        ));
    }
    section.push_str(&format!(
        "- **Aggregated Outputs:** {}\n",
        if metadata.use_pre_softmax {
            "logits"
        } else {
            "probabilities"
        }
    ));
    section.push_str(&format!(
        "- **Samples:** {} ({} images, {} classes)\n",
        metadata.num_groups, metadata.num_images, metadata.num_classes
    ));
    section.push_str(&format!(
        "- **Evaluation Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the accuracy summary.
fn generate_summary_section(report: &EvaluationReport) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Single Copy | TTA | Change |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | **{}** | {:+.2} pts |\n\n",
        percent(report.baseline_accuracy),
        percent(report.accuracy),
        report.improvement() * 100.0
    ));

    section
}

/// Generate the per-class accuracy table.
fn generate_class_section(per_class: &[ClassAccuracy]) -> String {
    if per_class.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Accuracy by Class\n\n");
    section.push_str("| Class | Samples | Correct | Accuracy |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");

    for class in per_class {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            class.label,
            class.samples,
            class.correct,
            percent(class.accuracy)
        ));
    }
    section.push('\n');

    section
}

/// Generate the misclassification section.
fn generate_errors_section(report: &EvaluationReport, max_listed: usize) -> String {
    let mut section = String::new();

    section.push_str("## Misclassified Samples\n\n");

    let misclassified: Vec<_> = report.misclassified().collect();
    if misclassified.is_empty() {
        section.push_str("Every sample was classified correctly.\n\n");
        return section;
    }

    // Most common confusions
    section.push_str("### Most Common Confusions\n\n");
    section.push_str("| True Class | Predicted | Count |\n");
    section.push_str("|:---|:---|:---:|\n");
    for ((label, predicted), count) in confusions(&report.samples).into_iter().take(5) {
        section.push_str(&format!("| {} | {} | {} |\n", label, predicted, count));
    }
    section.push('\n');

    // Worst offenders first
    let mut listed = misclassified;
    listed.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    section.push_str("| Sample | True Class | Predicted | Confidence | Copies Correct |\n");
    section.push_str("|:---|:---|:---|:---:|:---:|\n");
    for outcome in listed.iter().take(max_listed) {
        section.push_str(&generate_sample_row(outcome));
    }
    if listed.len() > max_listed {
        section.push_str(&format!(
            "\n*{} more not shown.*\n",
            listed.len() - max_listed
        ));
    }
    section.push('\n');

    section
}

/// Generate the table of every sample.
fn generate_samples_section(samples: &[SampleOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## Samples\n\n");
    section.push_str("<details>\n<summary>View all samples</summary>\n\n");
    section.push_str("| Sample | True Class | Predicted | Confidence | Copies Correct |\n");
    section.push_str("|:---|:---|:---|:---:|:---:|\n");
    for outcome in samples {
        section.push_str(&generate_sample_row(outcome));
    }
    section.push_str("\n</details>\n\n");

    section
}

/// Generate one table row for a sample.
fn generate_sample_row(outcome: &SampleOutcome) -> String {
    let predicted = outcome
        .predicted_label
        .clone()
        .unwrap_or_else(|| outcome.predicted_index.to_string());

    format!(
        "| `{}` | {} | {} {} | {:.3} | {}/{} |\n",
        outcome.base_name,
        outcome.label,
        if outcome.correct { "✅" } else { "❌" },
        predicted,
        outcome.confidence,
        outcome.copies_correct,
        outcome.copies
    )
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by tta-aggregator*\n");

    footer
}

fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Write the Markdown report to a file.
pub fn write_report(report: &EvaluationReport, config: &ReportConfig, path: &Path) -> Result<()> {
    let content = generate_markdown_report(report, config);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Generate a JSON report.
pub fn generate_json_report(report: &EvaluationReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write a JSON report to a file.
pub fn write_json_report(report: &EvaluationReport, path: &Path) -> Result<()> {
    let content = generate_json_report(report)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
