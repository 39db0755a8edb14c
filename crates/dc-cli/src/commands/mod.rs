//! One module per pipeline stage. Each stage is a plain function over its
//! argument struct returning a summary; `render_*` helpers turn summaries
//! into the text the binary prints.

pub mod dialogues;
pub mod export;
pub mod generate;
pub mod labels;
pub mod reviews;
pub mod validate;

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use anyhow::ensure;

/// How a command that can report findings ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
}

impl Outcome {
    pub fn from_valid(valid: bool) -> Self {
        if valid {
            Outcome::Passed
        } else {
            Outcome::Failed
        }
    }
}

/// Stages write new files; an input is never rewritten in place.
pub(crate) fn ensure_distinct_output<'a>(
    output: &Path,
    inputs: impl IntoIterator<Item = &'a Path>,
) -> Result<(), anyhow::Error> {
    for input in inputs {
        ensure!(
            !same_file(output, input),
            "output {} is also an input; choose a different --output",
            output.display()
        );
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

const RULE: &str =
    "================================================================================";

pub(crate) fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "{RULE}\n{title}\n{RULE}");
}

/// Prints `limit` items, then a count of the rest.
pub(crate) fn list_limited<T: std::fmt::Display>(
    out: &mut String,
    items: &[T],
    limit: usize,
    noun: &str,
) {
    for item in items.iter().take(limit) {
        let _ = writeln!(out, "  - {item}");
    }
    if items.len() > limit {
        let _ = writeln!(out, "  ... and {} more {noun}", items.len() - limit);
    }
}

/// Counts with their share of the column total.
pub(crate) fn distribution(out: &mut String, title: &str, counts: &BTreeMap<String, usize>) {
    let _ = writeln!(out, "\n{title}:");
    let total: usize = counts.values().sum();
    if counts.is_empty() {
        let _ = writeln!(out, "  (none)");
        return;
    }
    for (value, count) in counts {
        let share = if total == 0 {
            0.0
        } else {
            *count as f64 * 100.0 / total as f64
        };
        let _ = writeln!(out, "  {value}: {count} ({share:.1}%)");
    }
}
