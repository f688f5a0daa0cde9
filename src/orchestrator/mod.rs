use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{DutConfig, ServerConfig};
use crate::context::{Context, StopSignal};
use crate::status_aggregator::StatusAggregator;
use crate::status_exporter::{LogSink, StatusSink};
use crate::supervisor::Supervisor;

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const STATUS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// Process exit codes, mirroring the teacher's convention of a small numeric
/// taxonomy rather than bare `exit(1)` calls scattered through `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Normal,
    Interrupted,
    SupervisorCrashed,
    StartupError,
}

impl ExitOutcome {
    pub fn code(self) -> i32 {
        match self {
            ExitOutcome::Normal => 0,
            ExitOutcome::Interrupted => 130,
            // Stands in for ECHILD; there is no portable errno-style exit code on
            // the Rust side, so the server uses this literal for "a supervised
            // child task ended unexpectedly" (see design notes).
            ExitOutcome::SupervisorCrashed => 10,
            ExitOutcome::StartupError => -1,
        }
    }
}

/// Builds one Supervisor (plus its command catalog and event state) per enabled
/// DUT entry, runs each on its own OS thread alongside a StatusAggregator, and
/// wires a process-wide interrupt handler that raises every stop signal at once.
pub struct Orchestrator;

impl Orchestrator {
    pub fn run(config: ServerConfig) -> ExitOutcome {
        let mut supervisors = Vec::new();
        let mut stops = Vec::new();

        for cfg_path in config.enabled_machine_configs() {
            let dut_config = match DutConfig::load(cfg_path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(path = %cfg_path.display(), error = %e, "failed to load DUT config");
                    return ExitOutcome::StartupError;
                }
            };

            let stop: StopSignal = Context::new();
            let supervisor = match Supervisor::new(
                &dut_config,
                &config.server_ip,
                &config.server_log_store_dir,
                stop.clone(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(dut_id = %dut_config.hostname, error = %e, "failed to build supervisor");
                    return ExitOutcome::StartupError;
                }
            };

            stops.push(stop);
            supervisors.push(supervisor);
        }

        if supervisors.is_empty() {
            tracing::warn!("no enabled DUT entries found in server config; nothing to supervise");
        }

        let handles: Vec<_> = supervisors.iter().map(|s| s.handle()).collect();
        let aggregator_stop: StopSignal = Context::new();
        stops.push(aggregator_stop.clone());

        let all_stops = stops.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::warn!("interrupt received, stopping all supervisors");
            for stop in &all_stops {
                stop.stop();
            }
        }) {
            tracing::error!(error = %e, "failed to install interrupt handler");
        }

        let mut join_handles: Vec<JoinHandle<()>> = Vec::new();
        for mut supervisor in supervisors {
            join_handles.push(std::thread::spawn(move || supervisor.run()));
        }

        let aggregator_handle = {
            let aggregator = StatusAggregator::new(handles, STATUS_REFRESH_INTERVAL, aggregator_stop);
            std::thread::spawn(move || {
                let mut sink: Box<dyn StatusSink> = Box::new(LogSink);
                aggregator.run(sink.as_mut());
            })
        };

        // Supervisor::run and StatusAggregator::run both loop until their stop
        // signal is raised, so under normal operation none of these handles ever
        // finish on their own. Block here — rather than doing a single bounded
        // join per handle up front — until either the process is asked to stop
        // or a thread exits on its own, which only happens on an unexpected
        // crash. Only once that happens do we move into the bounded-timeout
        // join phase that actually belongs to shutdown.
        let all_handles: Vec<&JoinHandle<()>> =
            join_handles.iter().chain(std::iter::once(&aggregator_handle)).collect();
        let unexpected_exit = wait_for_shutdown_signal(&stops, &all_handles);

        let mut any_crashed = unexpected_exit;
        for handle in join_handles {
            if join_with_timeout(handle, JOIN_TIMEOUT).is_err() {
                any_crashed = true;
            }
        }
        let _ = join_with_timeout(aggregator_handle, JOIN_TIMEOUT);

        if any_crashed {
            ExitOutcome::SupervisorCrashed
        } else if stops.iter().any(|s| s.is_stopped()) {
            ExitOutcome::Interrupted
        } else {
            ExitOutcome::Normal
        }
    }
}

/// Blocks until either every `stop` is still unset but one of `handles` has
/// already finished (an unexpected exit, since these threads otherwise run
/// forever), or some `stop` has been raised (a requested shutdown). Returns
/// `true` if it returned because of the former — an unexpected exit.
fn wait_for_shutdown_signal(stops: &[StopSignal], handles: &[&JoinHandle<()>]) -> bool {
    loop {
        if handles.iter().any(|h| h.is_finished()) {
            return true;
        }
        if stops.iter().any(|s| s.is_stopped()) {
            return false;
        }
        let _ = stops
            .first()
            .map(|s| s.wait_timeout(SHUTDOWN_WATCH_INTERVAL));
    }
}

/// Joins a thread, tolerating it running past `timeout`: by the time this is
/// called, shutdown has already been requested, so a slow unit is abandoned
/// rather than blocking the process from exiting.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> Result<(), ()> {
    if !handle.is_finished() {
        std::thread::sleep(timeout);
    }
    if handle.is_finished() {
        handle.join().map_err(|_| ())
    } else {
        Ok(())
    }
}
