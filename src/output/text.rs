//! Human-readable text output

use crate::client::{Outcome, WorkloadReport};
use crate::stats::Histogram;
use crate::util::time::{calculate_rate, format_elapsed, format_rate, format_throughput};
use std::fmt::Write;

/// Print run results to console
pub fn print_report(report: &WorkloadReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    RESULTS");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    match &report.outcome {
        Outcome::Histograms(histograms) => {
            print!("{}", format_histogram_table(histograms));
        }
        Outcome::File { path, bytes } => {
            println!("File:");
            println!("  Written: {}", path.display());
            println!("  Size:    {} bytes", bytes);
        }
    }
    println!();

    let request_rate = calculate_rate(report.requests, report.elapsed);
    let byte_rate = calculate_rate(report.bytes_received(), report.elapsed);
    println!("Requests:");
    println!("  Total:      {} ({} req/s)", report.requests, format_rate(request_rate));
    println!("  Workers:    {}", report.workers.len());
    println!("  Throughput: {}", format_throughput(byte_rate));

    let dropped: u64 = report.workers.iter().map(|w| w.dropped).sum();
    if dropped > 0 {
        println!("  Dropped:    {}", dropped);
    }
    println!();

    println!("{}", format_elapsed(report.elapsed));
}

/// One row per patient, one column per bucket, plus out-of-range counts
///
/// ```text
///         [-2.00,-1.60) [-1.60,-1.20) ...    <min   >=max   total
/// 1                   0             3 ...       0       0    1000
/// ```
pub fn format_histogram_table(histograms: &[Histogram]) -> String {
    let mut out = String::new();
    let Some(first) = histograms.first() else {
        return out;
    };

    let _ = write!(out, "{:<8}", "");
    for i in 0..first.num_buckets() {
        let (low, high) = first.bucket_range(i);
        let _ = write!(out, "{:>16}", format!("[{:.2},{:.2})", low, high));
    }
    let _ = writeln!(out, "{:>8}{:>8}{:>8}", "<min", ">=max", "total");

    for (idx, hist) in histograms.iter().enumerate() {
        let _ = write!(out, "{:<8}", idx + 1);
        for count in hist.buckets() {
            let _ = write!(out, "{:>16}", count);
        }
        let _ = writeln!(out, "{:>8}{:>8}{:>8}", hist.underflow(), hist.overflow(), hist.total());
    }

    out
}
