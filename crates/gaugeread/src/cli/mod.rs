//! Command handlers.

pub mod config;
pub mod evaluate;
pub mod read;
pub mod run;

use gaugeread_core::Report;
use std::time::Duration;

/// Print a formatted summary table on stderr.
pub(crate) fn print_summary(report: &Report, skipped: usize, elapsed: Option<Duration>) {
    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Samples:      {:>8}", report.n_samples);
    eprintln!(
        "    Parsed:       {:>8}",
        report.n_samples - report.n_failed_parses
    );
    if report.n_failed_parses > 0 {
        eprintln!("    Failed:       {:>8}", report.n_failed_parses);
    }
    if skipped > 0 {
        eprintln!("    Resumed:      {:>8}", skipped);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    MAE:          {:>8}", metric(report.mae));
    eprintln!("    MSE:          {:>8}", metric(report.mse));
    eprintln!("    R²:           {:>8}", metric(report.r2));
    if let Some(accuracy) = &report.accuracy {
        eprintln!("  ------------------------------------");
        eprintln!(
            "    Value acc:    {:>7.1}%",
            accuracy.value_accuracy * 100.0
        );
        eprintln!("    Unit acc:     {:>7.1}%", accuracy.unit_accuracy * 100.0);
        eprintln!(
            "    Overall acc:  {:>7.1}%",
            accuracy.overall_accuracy * 100.0
        );
    }
    if let Some(elapsed) = elapsed {
        eprintln!("  ------------------------------------");
        eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    }
    eprintln!("  ====================================");
}

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}
