use std::time::Duration;

use crate::context::StopSignal;
use crate::status_exporter::StatusSink;
use crate::supervisor::SupervisorHandle;

/// Polls every Supervisor's summary on a fixed interval and hands each to a sink.
/// Runs on its own thread, independent from every Supervisor's event loop; reads
/// are advisory and never synchronized with the instant a counter last changed.
pub struct StatusAggregator {
    handles: Vec<SupervisorHandle>,
    refresh_interval: Duration,
    stop: StopSignal,
}

impl StatusAggregator {
    pub fn new(handles: Vec<SupervisorHandle>, refresh_interval: Duration, stop: StopSignal) -> Self {
        Self {
            handles,
            refresh_interval,
            stop,
        }
    }

    pub fn run(&self, sink: &mut dyn StatusSink) {
        while !self.stop.is_stopped() {
            for handle in &self.handles {
                let (benchmark, summary) = handle.summary();
                sink.export(handle.dut_id(), &benchmark, &summary);
            }
            let _ = self.stop.wait_timeout(self.refresh_interval);
        }
    }
}
