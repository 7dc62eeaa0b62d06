//! Plain-text renderings of finished results.
//!
//! Both renderers are pure: they read completed results and return a
//! `String`, so they work equally well in logs, terminals and snapshots.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::result::{AggregatedExecutionResult, ModelResult};

const MIN_WIDTH: usize = 10;
const FAILED: &str = "FAILED";

/// One horizontal bar per model plus an aggregate line.
///
/// Bars are scaled against `max(1.0, highest score)`; negative scores draw
/// an empty bar. Failed models show `FAILED` in place of a bar.
///
/// ```text
/// relevance (MEDIAN)
/// judge-a   |############        | 0.600
/// judge-b   | FAILED
/// aggregate |############        | 0.600
/// ```
pub fn render_score_chart<T>(result: &AggregatedExecutionResult<T>, width: usize) -> String {
    let width = width.max(MIN_WIDTH);
    let label_width = result
        .results
        .iter()
        .map(|r| r.model_id().len())
        .chain(std::iter::once("aggregate".len()))
        .max()
        .unwrap_or(0);
    let scale = result
        .scores()
        .into_iter()
        .fold(1.0_f64, |acc, s| if s > acc { s } else { acc });

    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", result.metric_name, result.strategy);
    for r in &result.results {
        match r.value() {
            Some(scored) => {
                let _ = writeln!(
                    out,
                    "{:<label_width$} |{}| {:.3}",
                    r.model_id(),
                    bar(scored.score, scale, width),
                    scored.score
                );
            }
            None => {
                let _ = writeln!(out, "{:<label_width$} | {}", r.model_id(), FAILED);
            }
        }
    }
    let _ = write!(
        out,
        "{:<label_width$} |{}| {:.3}",
        "aggregate",
        bar(result.aggregated_score, scale, width),
        result.aggregated_score
    );
    out
}

fn bar(score: f64, scale: f64, width: usize) -> String {
    let filled = if score.is_finite() && score > 0.0 {
        ((score / scale) * width as f64).round() as usize
    } else {
        0
    };
    let filled = filled.min(width);
    format!("{}{}", "#".repeat(filled), " ".repeat(width - filled))
}

/// Gantt chart of when each model ran.
///
/// Offsets are measured from the earliest `started_at`; bar lengths are
/// proportional to duration. Successful runs draw `=`, failures draw `x`.
/// Every model gets at least one cell so instant calls stay visible.
pub fn render_timeline<T>(results: &[ModelResult<T>], width: usize) -> String {
    let width = width.max(MIN_WIDTH);
    let Some(origin) = results.iter().map(|r| r.started_at()).min() else {
        return String::new();
    };

    let span_ms = results
        .iter()
        .map(|r| offset_ms(origin, r.started_at()) + r.duration().as_millis() as i64)
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let label_width = results
        .iter()
        .map(|r| r.model_id().len())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::with_capacity(results.len() + 1);
    lines.push(format!("{:<label_width$} 0 ms .. {} ms", "", span_ms as i64));
    for r in results {
        let start = offset_ms(origin, r.started_at()) as f64;
        let duration = r.duration().as_millis() as f64;

        let offset = ((start / span_ms) * width as f64).floor() as usize;
        let offset = offset.min(width - 1);
        let length = ((duration / span_ms) * width as f64).round() as usize;
        let length = length.max(1).min(width - offset);

        let glyph = if r.is_success() { "=" } else { "x" };
        lines.push(format!(
            "{:<label_width$} |{}{}{}| {} ms",
            r.model_id(),
            " ".repeat(offset),
            glyph.repeat(length),
            " ".repeat(width - offset - length),
            duration as u64
        ));
    }
    lines.join("\n")
}

fn offset_ms(origin: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at - origin).num_milliseconds().max(0)
}
