//! Elapsed-time and rate formatting for run reports

use std::time::Duration;

/// Split a duration into whole seconds and the leftover microseconds
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ecgpipe::util::time::split_secs_micros;
///
/// assert_eq!(split_secs_micros(Duration::from_micros(2_500_123)), (2, 500_123));
/// ```
pub fn split_secs_micros(duration: Duration) -> (u64, u32) {
    (duration.as_secs(), duration.subsec_micros())
}

/// Format the wall-clock time of a run the way the report prints it
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ecgpipe::util::time::format_elapsed;
///
/// assert_eq!(
///     format_elapsed(Duration::from_micros(3_000_042)),
///     "Took 3 seconds and 42 microseconds"
/// );
/// ```
pub fn format_elapsed(duration: Duration) -> String {
    let (secs, micros) = split_secs_micros(duration);
    format!("Took {} seconds and {} microseconds", secs, micros)
}

/// Requests (or any count) per second over `duration`
pub fn calculate_rate(count: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

/// Format a rate with K/M/G suffixes
///
/// # Examples
///
/// ```
/// use ecgpipe::util::time::format_rate;
///
/// assert_eq!(format_rate(500.0), "500");
/// assert_eq!(format_rate(1500.0), "1.50K");
/// ```
pub fn format_rate(rate: f64) -> String {
    if rate < 1_000.0 {
        format!("{:.0}", rate)
    } else if rate < 1_000_000.0 {
        format!("{:.2}K", rate / 1_000.0)
    } else if rate < 1_000_000_000.0 {
        format!("{:.2}M", rate / 1_000_000.0)
    } else {
        format!("{:.2}G", rate / 1_000_000_000.0)
    }
}

/// Format a byte rate (B/s, KB/s, MB/s, GB/s)
pub fn format_throughput(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec >= GB {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.2} B/s", bytes_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_secs_micros() {
        assert_eq!(split_secs_micros(Duration::from_secs(0)), (0, 0));
        assert_eq!(split_secs_micros(Duration::from_millis(1500)), (1, 500_000));
        // Sub-microsecond remainder is dropped
        assert_eq!(split_secs_micros(Duration::from_nanos(1_000_999)), (0, 1_000));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(
            format_elapsed(Duration::from_millis(250)),
            "Took 0 seconds and 250000 microseconds"
        );
    }

    #[test]
    fn test_calculate_rate() {
        assert_eq!(calculate_rate(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(999.0), "999");
        assert_eq!(format_rate(1_500_000.0), "1.50M");
        assert_eq!(format_rate(2_000_000_000.0), "2.00G");
    }

    #[test]
    fn test_format_throughput() {
        assert_eq!(format_throughput(512.0), "512.00 B/s");
        assert_eq!(format_throughput(1536.0), "1.50 KB/s");
        assert_eq!(format_throughput(3.0 * 1024.0 * 1024.0), "3.00 MB/s");
    }
}
