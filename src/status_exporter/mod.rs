use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::machine_events::Summary;

/// Sink for periodically exported DUT summaries. Exists so the choice of where
/// summaries go (structured logs, a file for another process to tail) is
/// pluggable without touching the aggregator's polling loop.
pub trait StatusSink {
    fn export(&mut self, dut_id: &str, benchmark: &str, summary: &Summary);
}

/// Default sink: one structured `tracing` event per summary, replacing the
/// curses/TTY dashboard the distilled spec explicitly drops.
#[derive(Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn export(&mut self, dut_id: &str, benchmark: &str, summary: &Summary) {
        match summary {
            Summary::Active {
                logs_per_sec,
                iterations_per_sec,
                sdc_count_total,
                sdc_count_run,
                ..
            } => {
                tracing::info!(
                    dut_id,
                    benchmark,
                    status = "active",
                    logs_per_sec,
                    iterations_per_sec,
                    sdc_count_total,
                    sdc_count_run,
                    "DUT status"
                );
            }
            Summary::Rebooting {
                reboot_attempts,
                max_reboot_attempts,
                ..
            } => {
                tracing::info!(
                    dut_id,
                    benchmark,
                    status = "rebooting",
                    reboot_attempts,
                    max_reboot_attempts,
                    "DUT status"
                );
            }
            Summary::Sleeping { .. } => {
                tracing::info!(dut_id, benchmark, status = "sleeping", "DUT status");
            }
            Summary::Unknown => {
                tracing::info!(dut_id, benchmark, status = "unknown", "DUT status");
            }
        }
    }
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    dut_id: &'a str,
    benchmark: &'a str,
    status: &'static str,
    exported_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdc_count_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sdc_count_run: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reboot_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_reboot_attempts: Option<u32>,
}

/// Appends one JSON-lines record per summary to a configured path, for
/// machine consumption by whatever replaces the original curses dashboard.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StatusSink for JsonFileSink {
    fn export(&mut self, dut_id: &str, benchmark: &str, summary: &Summary) {
        let exported_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let record = match summary {
            Summary::Active {
                logs_per_sec,
                iterations_per_sec,
                sdc_count_total,
                sdc_count_run,
                ..
            } => SummaryRecord {
                dut_id,
                benchmark,
                status: "active",
                exported_at,
                logs_per_sec: Some(*logs_per_sec),
                iterations_per_sec: Some(*iterations_per_sec),
                sdc_count_total: Some(*sdc_count_total),
                sdc_count_run: Some(*sdc_count_run),
                reboot_attempts: None,
                max_reboot_attempts: None,
            },
            Summary::Rebooting {
                reboot_attempts,
                max_reboot_attempts,
                ..
            } => SummaryRecord {
                dut_id,
                benchmark,
                status: "rebooting",
                exported_at,
                logs_per_sec: None,
                iterations_per_sec: None,
                sdc_count_total: None,
                sdc_count_run: None,
                reboot_attempts: Some(*reboot_attempts),
                max_reboot_attempts: Some(*max_reboot_attempts),
            },
            Summary::Sleeping { .. } => SummaryRecord {
                dut_id,
                benchmark,
                status: "sleeping",
                exported_at,
                logs_per_sec: None,
                iterations_per_sec: None,
                sdc_count_total: None,
                sdc_count_run: None,
                reboot_attempts: None,
                max_reboot_attempts: None,
            },
            Summary::Unknown => SummaryRecord {
                dut_id,
                benchmark,
                status: "unknown",
                exported_at,
                logs_per_sec: None,
                iterations_per_sec: None,
                sdc_count_total: None,
                sdc_count_run: None,
                reboot_attempts: None,
                max_reboot_attempts: None,
            },
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize status summary");
                return;
            }
        };

        if let Err(e) = append_line(&self.path, &line) {
            tracing::error!(error = %e, path = %self.path.display(), "failed to append status summary");
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_file_sink_appends_one_line_per_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.jsonl");
        let mut sink = JsonFileSink::new(path.clone());

        sink.export("dut01", "cuda_micro", &Summary::Unknown);
        sink.export("dut01", "cuda_micro", &Summary::Unknown);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"status\":\"unknown\""));
    }
}
