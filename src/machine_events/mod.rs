use std::time::{Duration, Instant};

use crate::event::Event;

pub const MAX_CONSECUTIVE_HARD_REBOOTS: u32 = 6;
pub const SLEEP_AFTER_FAILED_REBOOTS: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Rebooting,
    Sleeping,
    Unknown,
}

#[derive(Debug, Clone)]
pub enum Summary {
    Active {
        benchmark_start: Instant,
        logs_per_sec: f64,
        iterations_per_sec: f64,
        sdc_count_total: u64,
        sdc_count_run: u64,
        last_log_time: Option<Instant>,
    },
    Rebooting {
        reboot_attempts: u32,
        last_active: Option<Instant>,
        last_reboot_attempt: Option<Instant>,
        max_reboot_attempts: u32,
    },
    Sleeping {
        last_active: Option<Instant>,
        last_reboot_attempt: Option<Instant>,
        next_reboot: Instant,
    },
    Unknown,
}

/// Accumulates per-DUT benchmark state from the datagram stream and derives the
/// externally visible [`Status`]/[`Summary`]. `consecutive_soft_reboots` and
/// `consecutive_hard_reboots` live on the Supervisor, which owns the retry
/// escalation ladder — they are passed in at query time rather than duplicated
/// here.
#[derive(Debug, Default)]
pub struct MachineEvents {
    benchmark_start: Option<Instant>,
    run_start: Option<Instant>,
    last_run_start: Option<Instant>,
    last_run_end: Option<Instant>,

    benchmark_acc_time: f64,
    run_acc_time: f64,

    benchmark_logs: u64,
    run_logs: u64,
    benchmark_sdcs: u64,
    run_sdcs: u64,

    first_log_time: Option<Instant>,
    last_log_time: Option<Instant>,

    benchmark_iterations: i64,
    run_iterations: i64,

    benchmark_dues: u64,
    first_due_time: Option<Instant>,
    last_due_time: Option<Instant>,

    benchmark_soft_reboots: u64,
    last_soft_reboot_time: Option<Instant>,

    benchmark_hard_reboots: u64,
    last_hard_reboot_time: Option<Instant>,
}

impl MachineEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_benchmark(&mut self) {
        if self.benchmark_start.is_some() {
            tracing::warn!("benchmark already has a start timestamp; did you mean to start a new run?");
            return;
        }
        self.benchmark_start = Some(Instant::now());
    }

    pub fn start_run(&mut self) {
        if self.run_start.is_some() {
            tracing::warn!("a run is already in progress; did you forget to end it?");
        }
        self.run_start = Some(Instant::now());
        self.run_logs = 0;
        self.run_iterations = 0;
        self.run_sdcs = 0;
        self.run_acc_time = 0.0;
        self.last_soft_reboot_time = None;
        self.last_hard_reboot_time = None;
    }

    pub fn end_run(&mut self) {
        self.last_run_start = self.run_start;
        self.last_run_end = Some(Instant::now());
        self.run_start = None;
        self.benchmark_sdcs += self.run_sdcs;
        self.benchmark_acc_time += self.run_acc_time;
        self.benchmark_iterations += self.run_iterations;
    }

    pub fn iteration(&mut self, iterations: i64, accumulated_time: f64) {
        self.run_acc_time = accumulated_time;
        self.run_iterations = iterations;
        self.log(1);
    }

    pub fn log(&mut self, count: u64) {
        let now = Instant::now();
        if self.first_log_time.is_none() {
            self.first_log_time = Some(now);
        }
        self.last_log_time = Some(now);
        self.benchmark_logs += count;
        self.run_logs += count;
    }

    pub fn sdc(&mut self) {
        self.run_sdcs += 1;
        self.log(1);
    }

    pub fn due(&mut self) {
        let now = Instant::now();
        self.benchmark_dues += 1;
        if self.first_due_time.is_none() {
            self.first_due_time = Some(now);
        }
        self.last_due_time = Some(now);
        self.end_run();
    }

    pub fn soft_reboot(&mut self) {
        self.benchmark_soft_reboots += 1;
        self.last_soft_reboot_time = Some(Instant::now());
    }

    pub fn hard_reboot(&mut self) {
        self.benchmark_hard_reboots += 1;
        self.last_hard_reboot_time = Some(Instant::now());
    }

    /// Dispatches a decoded datagram to the matching accumulator. Unrecognized and
    /// log-file-only events are no-ops; parse failures were already absorbed by
    /// `EventParser` before this call and never reach here as errors.
    pub fn handle(&mut self, event: &Event) {
        match event {
            Event::Iteration {
                iterations,
                accumulated_time,
                ..
            } => self.iteration(*iterations, *accumulated_time),
            Event::Header => self.start_run(),
            Event::End => self.end_run(),
            Event::Info | Event::Err => self.log(1),
            Event::Sdc => self.sdc(),
            Event::Abort => self.due(),
            Event::Begin | Event::Unknown { .. } => {}
        }
    }

    pub fn status(&self, consecutive_soft_reboots: u32, consecutive_hard_reboots: u32) -> Status {
        if self.run_start.is_some() {
            Status::Active
        } else if consecutive_hard_reboots < MAX_CONSECUTIVE_HARD_REBOOTS && consecutive_soft_reboots > 0 {
            Status::Rebooting
        } else if consecutive_hard_reboots == MAX_CONSECUTIVE_HARD_REBOOTS {
            Status::Sleeping
        } else {
            Status::Unknown
        }
    }

    pub fn summary(&self, consecutive_soft_reboots: u32, consecutive_hard_reboots: u32) -> Summary {
        match self.status(consecutive_soft_reboots, consecutive_hard_reboots) {
            Status::Active => {
                let now = Instant::now();
                let benchmark_start = self.benchmark_start.unwrap_or(now);
                let run_start = self.run_start.unwrap_or(now);

                let benchmark_secs = now.saturating_duration_since(benchmark_start).as_secs_f64();
                let run_secs = now.saturating_duration_since(run_start).as_secs_f64();

                Summary::Active {
                    benchmark_start,
                    logs_per_sec: safe_rate(self.benchmark_logs as f64, benchmark_secs),
                    iterations_per_sec: safe_rate(self.run_iterations as f64, run_secs),
                    sdc_count_total: self.benchmark_sdcs,
                    sdc_count_run: self.run_sdcs,
                    last_log_time: self.last_log_time,
                }
            }
            Status::Rebooting => Summary::Rebooting {
                reboot_attempts: consecutive_soft_reboots.max(consecutive_hard_reboots),
                last_active: self.last_run_end,
                last_reboot_attempt: safe_max_instant(self.last_soft_reboot_time, self.last_hard_reboot_time),
                max_reboot_attempts: MAX_CONSECUTIVE_HARD_REBOOTS,
            },
            Status::Sleeping => {
                let last_reboot_attempt =
                    safe_max_instant(self.last_soft_reboot_time, self.last_hard_reboot_time);
                Summary::Sleeping {
                    last_active: self.last_run_end,
                    last_reboot_attempt,
                    next_reboot: last_reboot_attempt
                        .unwrap_or_else(Instant::now)
                        + SLEEP_AFTER_FAILED_REBOOTS,
                }
            }
            Status::Unknown => Summary::Unknown,
        }
    }
}

fn safe_rate(count: f64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        0.0
    } else {
        count / elapsed_secs
    }
}

fn safe_max_instant(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unknown_with_no_activity() {
        let events = MachineEvents::new();
        assert_eq!(events.status(0, 0), Status::Unknown);
    }

    #[test]
    fn run_in_progress_is_active() {
        let mut events = MachineEvents::new();
        events.start_benchmark();
        events.start_run();
        assert_eq!(events.status(0, 0), Status::Active);
        assert!(matches!(events.summary(0, 0), Summary::Active { .. }));
    }

    #[test]
    fn soft_reboots_without_hitting_the_cap_are_rebooting() {
        let events = MachineEvents::new();
        assert_eq!(events.status(2, 0), Status::Rebooting);
    }

    #[test]
    fn hitting_max_hard_reboots_is_sleeping() {
        let events = MachineEvents::new();
        assert_eq!(
            events.status(0, MAX_CONSECUTIVE_HARD_REBOOTS),
            Status::Sleeping
        );
    }

    #[test]
    fn end_run_folds_counters_into_the_benchmark() {
        let mut events = MachineEvents::new();
        events.start_run();
        events.iteration(10, 2.5);
        events.sdc();
        events.end_run();
        assert_eq!(events.benchmark_iterations, 10);
        assert_eq!(events.benchmark_sdcs, 1);
        assert!(events.run_start.is_none());
    }

    #[test]
    fn end_run_records_when_the_run_that_just_ended_had_started() {
        let mut events = MachineEvents::new();
        events.start_run();
        let started = events.run_start;
        events.end_run();
        assert_eq!(events.last_run_start, started);
    }

    #[test]
    fn due_ends_the_run_as_a_side_effect() {
        let mut events = MachineEvents::new();
        events.start_run();
        events.due();
        assert!(events.run_start.is_none());
        assert_eq!(events.benchmark_dues, 1);
    }

    #[test]
    fn handle_dispatches_header_to_start_run() {
        let mut events = MachineEvents::new();
        events.handle(&Event::Header);
        assert!(events.run_start.is_some());
    }
}
