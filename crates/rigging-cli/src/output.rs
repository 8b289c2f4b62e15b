//! Formatted output helpers for CLI commands.
//!
//! Provides colored status markers, redacted value rendering and
//! human-readable durations.

use std::collections::BTreeMap;
use std::time::Duration;

use rigging_common::secret::{REDACTED, Sensitive};
use rigging_common::types::PlanKind;
use rigging_common::value::Value;
use rigging_runtime::{Outcome, RunReport};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const CYAN: &str = "\x1b[36m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

/// Formats a duration for humans (e.g., "850ms", "12.3s", "4m 05s").
#[must_use]
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if elapsed.as_secs() < 60 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

/// Renders a value, or the redaction marker if it is secret and secrets
/// are not shown.
#[must_use]
pub fn display_value(value: &Sensitive<Value>, show_secrets: bool) -> String {
    if value.is_secret() && !show_secrets {
        REDACTED.to_string()
    } else {
        value.expose().render()
    }
}

/// JSON form of a value, redacted like [`display_value`].
#[must_use]
pub fn value_json(value: &Sensitive<Value>, show_secrets: bool) -> serde_json::Value {
    if value.is_secret() && !show_secrets {
        serde_json::Value::String(REDACTED.to_string())
    } else {
        value.expose().to_json()
    }
}

/// Plan marker for a step: `+` create, `~` update, `-` delete.
#[must_use]
pub const fn plan_marker(kind: PlanKind, recorded: bool) -> (&'static str, &'static str) {
    match (kind, recorded) {
        (PlanKind::Destroy, _) => ("-", "delete"),
        (PlanKind::Apply, true) => ("~", "update"),
        (PlanKind::Apply, false) => ("+", "create"),
    }
}

fn outcome_line(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Succeeded {
            operation, changed, ..
        } => {
            if *changed {
                format!("{GREEN}\u{2713}{RESET} {operation}")
            } else {
                format!("{GREEN}\u{2713}{RESET} {DIM}unchanged{RESET}")
            }
        }
        Outcome::Failed { operation, error } => {
            format!("{RED}\u{2717}{RESET} {operation} failed: {error}")
        }
        Outcome::Skipped { blocked_by } => {
            format!("{YELLOW}\u{21b7}{RESET} skipped, waits on {}", blocked_by.join(", "))
        }
        Outcome::Cancelled => format!("{DIM}\u{25cb} cancelled{RESET}"),
    }
}

/// Prints per-resource outcomes and a summary line.
pub fn print_report(report: &RunReport, elapsed: Duration) {
    eprintln!();
    for result in &report.results {
        eprintln!(
            "    {BOLD}{}{RESET} {DIM}({}){RESET} {}",
            result.name,
            result.kind,
            outcome_line(&result.outcome)
        );
    }
    eprintln!();
    let color = if report.is_success() { GREEN } else { RED };
    eprintln!(
        "  {color}{BOLD}{}{RESET} {DIM}in {}{RESET}",
        report,
        format_duration(elapsed)
    );
}

/// Prints outputs as `name = value`, one per line.
pub fn print_outputs(values: &BTreeMap<String, Sensitive<Value>>, show_secrets: bool) {
    if values.is_empty() {
        return;
    }
    eprintln!();
    eprintln!("  {CYAN}Outputs:{RESET}");
    for (name, value) in values {
        println!("    {BOLD}{name}{RESET} = {}", display_value(value, show_secrets));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_picks_a_unit() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
    }

    #[test]
    fn secrets_are_redacted_unless_shown() {
        let key = Sensitive::secret(Value::from("sk-do-abc"));
        assert_eq!(display_value(&key, false), REDACTED);
        assert_eq!(display_value(&key, true), "sk-do-abc");
        assert_eq!(value_json(&key, false), serde_json::json!(REDACTED));

        let uuid = Sensitive::plain(Value::from("k-1"));
        assert_eq!(display_value(&uuid, false), "k-1");
    }

    #[test]
    fn plan_markers() {
        assert_eq!(plan_marker(PlanKind::Apply, false).0, "+");
        assert_eq!(plan_marker(PlanKind::Apply, true).0, "~");
        assert_eq!(plan_marker(PlanKind::Destroy, true).0, "-");
    }
}
