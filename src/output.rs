use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ConfigResult, ProgressEvent, ProgressSink};
use crate::domain::TransformResult;
use crate::executor::TidyReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_config(result: &ConfigResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_tidy(report: &TidyReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_config(result: &ConfigResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(stdout, "manifest: {}", result.manifest_path)?;
        writeln!(
            stdout,
            "raw folders: {}  fastq: {}  summaries: {}{}",
            result.raw_folders,
            result.sequence_files,
            result.summary_files,
            if result.active { "  (active run)" } else { "" }
        )?;
        for warning in &result.warnings {
            writeln!(stdout, "warning: {warning}")?;
        }
        Ok(())
    }

    pub fn print_tidy(report: &TidyReport) -> io::Result<()> {
        Self::write_tidy(&mut io::stdout(), report)
    }

    pub fn write_tidy<W: Write>(out: &mut W, report: &TidyReport) -> io::Result<()> {
        writeln!(
            out,
            "completed: {}  skipped: {}  failed: {}{}",
            report.completed,
            report.skipped,
            report.failed,
            if report.policy.dry_run {
                format!("  planned: {} (dry run)", report.planned)
            } else {
                String::new()
            }
        )?;
        for entry in &report.entries {
            match &entry.result {
                TransformResult::Completed { destination, .. } => {
                    writeln!(out, "  ok      {} -> {destination}", entry.source)?
                }
                TransformResult::Planned => {
                    let target = entry
                        .plan
                        .as_ref()
                        .map(|plan| plan.destination.as_str())
                        .unwrap_or("?");
                    writeln!(out, "  plan    {} -> {target}", entry.source)?
                }
                TransformResult::Skipped { reason } => {
                    writeln!(out, "  skip    {}: {reason}", entry.source)?
                }
                TransformResult::Failed { error } => {
                    writeln!(out, "  FAILED  {}: {error}", entry.source)?
                }
            }
        }
        for warning in &report.warnings {
            writeln!(out, "warning: {warning}")?;
        }
        Ok(())
    }
}
