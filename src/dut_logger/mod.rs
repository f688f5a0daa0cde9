use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndStatus {
    NormalEnd,
    SoftAppReboot,
    SoftOsReboot,
    HardReboot,
}

impl EndStatus {
    fn tag(self) -> &'static str {
        match self {
            EndStatus::NormalEnd => "NORMAL_END",
            EndStatus::SoftAppReboot => "SOFT_APP_REBOOT",
            EndStatus::SoftOsReboot => "SOFT_OS_REBOOT",
            EndStatus::HardReboot => "HARD_REBOOT",
        }
    }
}

/// Append-only per-run log file. Construction and every operation are infallible
/// from the Supervisor's point of view: a failure to write a log line must never
/// interrupt the recovery state machine, so I/O errors are logged and swallowed.
pub struct DutLogger {
    path: PathBuf,
    file: Option<File>,
}

impl DutLogger {
    pub fn open(log_dir: &Path, test_name: &str, header: &str, hostname: &str) -> Self {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file_name = format!("{hostname}_{test_name}_{header}_{started_at}.log");
        let path = log_dir.join(file_name);

        if let Err(e) = std::fs::create_dir_all(log_dir) {
            tracing::error!(error = %e, dir = %log_dir.display(), "failed to create DUT log directory");
        }

        let file = match File::create(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to open DUT log file");
                None
            }
        };

        Self { path, file }
    }

    /// Appends a raw, newline-terminated datagram to the log.
    pub fn write(&mut self, bytes: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(bytes) {
            tracing::error!(error = %e, path = %self.path.display(), "failed to write DUT log line");
        }
        if !bytes.ends_with(b"\n") {
            let _ = file.write_all(b"\n");
        }
    }

    /// Appends a trailing end-status tag line and closes the file.
    pub fn finalize(mut self, status: EndStatus) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "#{}", status.tag()) {
                tracing::error!(error = %e, path = %self.path.display(), "failed to finalize DUT log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_finalize_produces_expected_byte_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = DutLogger::open(dir.path(), "cuda_micro", "HDR", "dut01");
        logger.write(b"\x00#IT 1 KerTime:1.0 AccTime:1.0");
        logger.write(b"\x00#END");
        logger.finalize(EndStatus::NormalEnd);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let contents = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(contents.contains("#IT 1 KerTime:1.0 AccTime:1.0"));
        assert!(contents.contains("#END"));
        assert!(contents.trim_end().ends_with("#NORMAL_END"));
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("dut02");
        let logger = DutLogger::open(&nested, "t", "h", "dut02");
        assert!(nested.is_dir());
        logger.finalize(EndStatus::HardReboot);
    }
}
