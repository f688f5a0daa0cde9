use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("could not read catalog file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse catalog file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("catalog is empty after reading all json_files")]
    EmptyCatalog,
}

#[derive(Deserialize, Clone, Debug)]
struct CommandRecord {
    exec: String,
    kill: String,
    codename: String,
    header: String,
}

/// One catalog entry paired with the instant its current execution window began.
#[derive(Clone, Debug)]
pub struct Command {
    pub exec: String,
    pub kill: String,
    pub code_name: String,
    pub header: String,
    start_timestamp: Instant,
}

/// Output of [`CommandRotator::get_run_commands`]: ready-to-send exec/kill byte
/// strings plus the identifying metadata of the command they belong to.
pub struct RunCommands {
    pub cmd_exec: Vec<u8>,
    pub cmd_kill: Vec<u8>,
    pub code_name: String,
    pub header: String,
}

/// Cycles through a catalog of benchmark commands, advancing to the next one once
/// the current one has run for longer than its window.
#[derive(Debug)]
pub struct CommandRotator {
    catalog: Vec<CommandRecord>,
    queue: VecDeque<CommandRecord>,
    current: Command,
    window: Duration,
}

impl CommandRotator {
    pub fn from_catalogs(paths: &[PathBuf]) -> Result<Self, CatalogError> {
        Self::from_catalogs_with_window(paths, DEFAULT_WINDOW)
    }

    pub fn from_catalogs_with_window(
        paths: &[PathBuf],
        window: Duration,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Vec::new();
        for path in paths {
            let file = std::fs::File::open(path).map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;
            let records: Vec<CommandRecord> =
                serde_json::from_reader(file).map_err(|source| CatalogError::Json {
                    path: path.clone(),
                    source,
                })?;
            catalog.extend(records);
        }

        if catalog.is_empty() {
            return Err(CatalogError::EmptyCatalog);
        }

        let mut queue: VecDeque<CommandRecord> = catalog.clone().into();
        let first = queue.pop_front().expect("catalog is non-empty");
        let current = Command {
            exec: first.exec.clone(),
            kill: first.kill.clone(),
            code_name: first.codename.clone(),
            header: first.header.clone(),
            start_timestamp: Instant::now(),
        };

        Ok(Self {
            catalog,
            queue,
            current,
            window,
        })
    }

    pub fn current(&self) -> &Command {
        &self.current
    }

    pub fn is_window_expired(&self) -> bool {
        self.current.start_timestamp.elapsed() > self.window
    }

    fn refill_if_empty(&mut self) {
        if self.queue.is_empty() {
            self.queue = self.catalog.clone().into();
        }
    }

    fn advance(&mut self) {
        self.refill_if_empty();
        let next = self.queue.pop_front().expect("just refilled if it was empty");
        self.current = Command {
            exec: next.exec,
            kill: next.kill,
            code_name: next.codename,
            header: next.header,
            start_timestamp: Instant::now(),
        };
    }

    /// Advances the rotation if the current command's window has expired, then
    /// returns normalized exec/kill byte strings for whatever is now current.
    pub fn get_run_commands(&mut self) -> RunCommands {
        if self.is_window_expired() {
            self.advance();
        }

        let cmd_exec = format!("nohup {} &\r\n", strip_exec_wrapping(&self.current.exec)).into_bytes();
        let cmd_kill = format!("{} \r\n", strip_leading_nohup(&self.current.kill)).into_bytes();

        RunCommands {
            cmd_exec,
            cmd_kill,
            code_name: self.current.code_name.clone(),
            header: self.current.header.clone(),
        }
    }
}

/// Strips a leading `nohup` and a trailing `&` (with any surrounding CRLF/whitespace
/// the catalog entry may already carry), so re-wrapping with `nohup ... &\r\n` never
/// duplicates either.
fn strip_exec_wrapping(input: &str) -> String {
    let trailing = Regex::new(r"\s*&[\s\r\n]*$").expect("valid regex");
    let mut s = strip_leading_nohup(input);
    loop {
        let stripped = trailing.replace(&s, "").trim().to_string();
        if stripped == s {
            break;
        }
        s = stripped;
    }
    s
}

fn strip_leading_nohup(input: &str) -> String {
    let leading = Regex::new(r"^\s*nohup\s*").expect("valid regex");
    let mut s = input.trim().to_string();
    loop {
        let stripped = leading.replace(&s, "").trim().to_string();
        if stripped == s {
            break;
        }
        s = stripped;
    }
    s
}
