//! Console output around a sweep run.

use foldsweep_core::{ConfigMap, SweepSummary};
use std::io::Write;

const RULE_WIDTH: usize = 40;

fn banner(edge: char, title: &str) -> String {
    format!("{edge}{} {title} {}", "=".repeat(17), "=".repeat(24))
}

fn framed(out: &mut impl Write, title: &str, body: &str) -> anyhow::Result<()> {
    writeln!(out, "{}", banner('>', title))?;
    writeln!(out, "{body}")?;
    writeln!(out, "{}", banner('<', title))?;
    Ok(())
}

/// Print the resolved configuration and the work function before the sweep starts.
pub fn write_preamble(
    out: &mut impl Write,
    config: &ConfigMap,
    work: &dyn std::fmt::Display,
) -> anyhow::Result<()> {
    framed(out, "CFG", &serde_json::to_string_pretty(config)?)?;
    framed(out, "WORK", &work.to_string())?;
    Ok(())
}

/// Print where the finished sweep lives on the tracking service.
pub fn write_summary(out: &mut impl Write, summary: &SweepSummary) -> anyhow::Result<()> {
    let rule = "*".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    writeln!(
        out,
        "Sweep URL:        {}",
        summary.sweep_url.as_deref().unwrap_or("-")
    )?;
    writeln!(out, "Sweep Group URL:  {}", summary.group_url)?;
    writeln!(out, "{rule}")?;
    for fold in &summary.folds {
        writeln!(out, "  {:<24} {:.6}", fold.display_name, fold.value)?;
    }
    writeln!(out, "  {:<24} {:.6}", "mean", summary.aggregate)?;
    Ok(())
}
