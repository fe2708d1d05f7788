//! Format session reports for human consumption.

use std::time::Duration;

use honestbt_core::progress::{format_bytes, format_duration};
use honestbt_core::{RunConfig, SessionReport};

const RULE: &str = "═══════════════════════════════════════════════════════════════════════";

/// Configuration banner printed before the first pass.
pub fn format_banner(config: &RunConfig, target: &str, direct: bool) -> String {
    let mut output = String::new();
    output.push_str(RULE);
    output.push_str("\n  honestbt\n");
    output.push_str(RULE);
    output.push_str("\n\n");

    output.push_str(&format!("Target:          {target}\n"));
    output.push_str(&format!(
        "Region:          [{}, {}) ({})\n",
        config.region.begin,
        config.region.end,
        format_bytes(config.region.len())
    ));
    output.push_str(&format!("Chunk size:      {}\n", format_bytes(config.chunk_size)));
    output.push_str(&format!(
        "Key:             {} (AES-{})\n",
        config.key.to_base64(),
        config.key.size().bits()
    ));
    output.push_str(&format!(
        "I/O:             {}\n",
        if direct { "direct" } else { "buffered" }
    ));
    if !config.fuzz.is_zero() {
        output.push_str(&format!("Fuzz:            {}%\n", config.fuzz.to_percent_string()));
    }
    if let Some(window) = config.fake_rollover {
        output.push_str(&format!("Fake rollover:   {}\n", format_bytes(window)));
    }
    if let Some(threshold) = config.fake_zeroed {
        output.push_str(&format!("Fake zeroed:     after {}\n", format_bytes(threshold)));
    }
    if config.skip_test {
        output.push_str("Test pass:       skipped\n");
    }
    output
}

/// Final report for the passes that ran.
pub fn format_report(report: &SessionReport) -> String {
    let mut output = String::new();
    output.push_str(RULE);
    output.push_str("\n  honestbt Report\n");
    output.push_str(RULE);
    output.push_str("\n\n");

    if let Some(w) = &report.write {
        output.push_str("─── Write Pass ────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Bytes written:   {}\n", format_bytes(w.bytes_written)));
        output.push_str(&format!("Chunks:          {}\n", w.chunks));
        output.push_str(&format!("Elapsed:         {}\n", format_duration(w.elapsed)));
        output.push_str(&format!(
            "Throughput:      {}\n",
            throughput(w.bytes_written, w.elapsed)
        ));
        if w.corrupted_bytes > 0 {
            output.push_str(&format!("Fuzzed bytes:    {}\n", w.corrupted_bytes));
        }
        output.push('\n');
    }

    if let Some(t) = &report.test {
        output.push_str("─── Test Pass ─────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Bytes tested:    {}\n", format_bytes(t.bytes_tested)));
        output.push_str(&format!("Elapsed:         {}\n", format_duration(t.elapsed)));
        output.push_str(&format!(
            "Throughput:      {}\n",
            throughput(t.bytes_tested, t.elapsed)
        ));
        output.push_str(&format!("Mismatched:      {} bytes\n", t.mismatched_bytes));
        output.push_str(&format!("Bad chunks:      {}\n", t.bad_chunks));
        if t.suppressed_chunks > 0 {
            output.push_str(&format!(
                "Summarised:      {} chunks (use --exhaustive-diff for every byte)\n",
                t.suppressed_chunks
            ));
        }
        output.push('\n');
    }

    let verdict = match &report.test {
        None => "NOT VERIFIED (test pass did not run)",
        Some(t) if t.mismatched_bytes == 0 => "PASS",
        Some(_) => "FAIL (device did not return what was written)",
    };
    output.push_str(&format!("Result:          {verdict}\n"));
    output
}

fn throughput(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use honestbt_core::{Key, TestStats, WriteStats};

    fn write_stats() -> WriteStats {
        WriteStats {
            bytes_written: 8 << 20,
            chunks: 8,
            corrupted_bytes: 0,
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn clean_report() {
        let report = SessionReport {
            write: Some(write_stats()),
            test: Some(TestStats {
                bytes_tested: 8 << 20,
                elapsed: Duration::from_secs(4),
                ..TestStats::default()
            }),
        };
        let text = format_report(&report);
        assert!(text.contains("Bytes written:   8.00 MiB"));
        assert!(text.contains("Throughput:      4.00 MiB/s"));
        assert!(text.contains("Throughput:      2.00 MiB/s"));
        assert!(text.contains("Result:          PASS"));
        assert!(!text.contains("Fuzzed"));
    }

    #[test]
    fn failing_report_mentions_suppression() {
        let report = SessionReport {
            write: None,
            test: Some(TestStats {
                bytes_tested: 1 << 20,
                mismatched_bytes: 900_000,
                bad_chunks: 16,
                suppressed_chunks: 6,
                elapsed: Duration::ZERO,
            }),
        };
        let text = format_report(&report);
        assert!(!text.contains("Write Pass"));
        assert!(text.contains("Mismatched:      900000 bytes"));
        assert!(text.contains("Summarised:      6 chunks"));
        assert!(text.contains("Throughput:      -"));
        assert!(text.contains("Result:          FAIL"));
    }

    #[test]
    fn write_only_is_not_verified() {
        let report = SessionReport {
            write: Some(write_stats()),
            test: None,
        };
        assert!(format_report(&report).contains("NOT VERIFIED"));
    }

    #[test]
    fn banner_shows_the_key_and_simulations() {
        let config = RunConfig::builder(Key::from_bytes(&[0u8; 16]).unwrap())
            .end(Some(1 << 20))
            .chunk_size(64 * 1024)
            .fake_rollover(Some(256 * 1024))
            .build()
            .unwrap();
        let text = format_banner(&config, "/dev/sdz", false);
        assert!(text.contains("Key:             AAAAAAAAAAAAAAAAAAAAAA== (AES-128)"));
        assert!(text.contains("Region:          [0, 1048576) (1.00 MiB)"));
        assert!(text.contains("I/O:             buffered"));
        assert!(text.contains("Fake rollover:   256.00 KiB"));
        assert!(!text.contains("Fuzz"));
    }
}
