use std::io::{self, Write};

use serde::Serialize;

use crate::app::{MarkResult, RunReport, StatusReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_mark(result: &MarkResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(report: &StatusReport) -> io::Result<()> {
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

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn write_run(out: &mut impl Write, report: &RunReport) -> io::Result<()> {
        let rule = "=".repeat(60);
        writeln!(out, "{rule}")?;
        writeln!(out, "SUMMARY{}", if report.dry_run { " (dry-run)" } else { "" })?;
        writeln!(out, "{rule}")?;
        writeln!(out, "  Standalone downloaded:   {}", report.standalone_downloaded)?;
        writeln!(out, "  Episodes downloaded:     {}", report.episodes_downloaded)?;
        writeln!(out, "  Series checked:          {}", report.series_checked)?;
        writeln!(out, "  Skipped (already seen):  {}", report.skipped_seen)?;
        writeln!(out, "  Skipped (perm. error):   {}", report.skipped_permanent)?;
        writeln!(out, "  Failed this run:         {}", report.failed)?;
        writeln!(out, "  Newly permanent:         {}", report.newly_permanent)?;
        if !report.permanent_failures.is_empty() {
            writeln!(out, "  Permanent failures:")?;
            for id in &report.permanent_failures {
                writeln!(out, "    {id}")?;
            }
        }
        if !report.advisories.is_empty() {
            writeln!(out, "  Stale series (consider marking complete):")?;
            for advisory in &report.advisories {
                writeln!(out, "    {}", advisory.message())?;
            }
        }
        if report.limit_reached {
            writeln!(out, "  (Stopped at the download limit)")?;
        }
        if report.interrupted {
            writeln!(out, "  (Run was interrupted by user)")?;
        }
        Ok(())
    }

    pub fn write_mark(out: &mut impl Write, result: &MarkResult, marking: bool) -> io::Result<()> {
        match (marking, result.changed) {
            (true, true) => writeln!(out, "Marked as complete: {}", result.id),
            (true, false) => writeln!(out, "Already marked as complete: {}", result.id),
            (false, true) => writeln!(out, "Unmarked (will be re-checked): {}", result.id),
            (false, false) => writeln!(out, "Not found in seen file: {}", result.id),
        }
    }

    pub fn write_status(out: &mut impl Write, report: &StatusReport) -> io::Result<()> {
        writeln!(out, "Seen items:       {}", report.seen)?;
        writeln!(out, "Seen episodes:    {}", report.episodes)?;
        writeln!(out, "Tracked series:   {}", report.tracked_series)?;
        writeln!(out, "Failing items:    {}", report.failing.len())?;
        for entry in &report.failing {
            writeln!(
                out,
                "  {} ({} failed runs{})",
                entry.id,
                entry.consecutive_run_failures,
                entry
                    .last_error
                    .as_deref()
                    .map(|error| format!(", last: {error}"))
                    .unwrap_or_default()
            )?;
        }
        writeln!(out, "Permanent:        {}", report.permanent.len())?;
        for id in &report.permanent {
            writeln!(out, "  {id}")?;
        }
        for advisory in &report.advisories {
            writeln!(out, "Stale: {}", advisory.message())?;
        }
        Ok(())
    }
}
