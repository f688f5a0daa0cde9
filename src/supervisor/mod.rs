use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::command_rotator::{CatalogError, CommandRotator};
use crate::config::DutConfig;
use crate::context::StopSignal;
use crate::dut_logger::{DutLogger, EndStatus};
use crate::event::{Event, EventParser};
use crate::machine_events::{MachineEvents, Status, Summary};
use crate::power_switch::{self, PowerState, PowerSwitch};
use crate::remote_shell::{RemoteShell, RemoteShellError, Session};

const TELNET_PORT: u16 = 23;
const DATA_SIZE: usize = 4096;

const MAX_SOFT_APP_REBOOTS: u32 = 3;
const MAX_TELNET_TRIES: u32 = 4;
const READ_EAGER: Duration = Duration::from_secs(1);
const MAX_SOFT_OS_REBOOTS: u32 = 3;
const WAIT_AFTER_SOFT_OS_REBOOT: Duration = Duration::from_secs(5);
const MAX_HARD_REBOOTS: u32 = 6;
const DEFAULT_REST: Duration = Duration::from_secs(4);
const LONG_REST: Duration = Duration::from_secs(1800);
const BOOT_PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("DUT is unreachable")]
    HostUnreachable,

    #[error("telnet connection error")]
    TelnetConnectionError,

    #[error("maximum consecutive soft app reboots reached")]
    MaxAppReboot,

    #[error("maximum consecutive soft OS reboots reached")]
    MaxOsReboot,

    #[error("soft OS reboot is disabled for this DUT")]
    DisabledSoftOsReboot,

    #[error("stop signal raised mid-operation")]
    ThreadEventSet,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

#[derive(Error, Debug)]
pub enum SupervisorInitError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("could not bind receive socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

struct SupervisorState {
    events: MachineEvents,
    soft_app_reboot_count: u32,
    soft_os_reboot_count: u32,
    hard_reboot_count: u32,
}

/// A read-only view used by the status aggregator, sharing the same lock as the
/// owning Supervisor's event loop so a summary always reflects one consistent
/// snapshot of counters.
#[derive(Clone)]
pub struct SupervisorHandle {
    dut_id: String,
    benchmark: String,
    state: Arc<Mutex<SupervisorState>>,
}

impl SupervisorHandle {
    pub fn dut_id(&self) -> &str {
        &self.dut_id
    }

    pub fn status(&self) -> Status {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .events
            .status(state.soft_app_reboot_count, state.hard_reboot_count)
    }

    pub fn summary(&self) -> (String, Summary) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let summary = state
            .events
            .summary(state.soft_app_reboot_count, state.hard_reboot_count);
        (self.benchmark.clone(), summary)
    }
}

/// Owns everything needed to keep one DUT alive and running benchmarks: the power
/// switch, the telnet-style remote shell, the command rotation catalog, the
/// per-run log file, and the UDP telemetry socket.
pub struct Supervisor {
    dut_id: String,
    ip: String,
    username: String,
    password: String,
    power_switch_outlet: u8,
    power_switch: Box<dyn PowerSwitch + Send + Sync>,
    boot_waiting_time: Duration,
    max_timeout_time: Duration,
    disable_os_soft_reboot: bool,

    stop: StopSignal,
    state: Arc<Mutex<SupervisorState>>,
    rotator: CommandRotator,
    dut_logger: Option<DutLogger>,
    log_dir: PathBuf,
    socket: UdpSocket,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("dut_id", &self.dut_id)
            .field("ip", &self.ip)
            .field("username", &self.username)
            .field("power_switch_outlet", &self.power_switch_outlet)
            .field("boot_waiting_time", &self.boot_waiting_time)
            .field("max_timeout_time", &self.max_timeout_time)
            .field("disable_os_soft_reboot", &self.disable_os_soft_reboot)
            .field("stop", &self.stop)
            .field("rotator", &self.rotator)
            .field("log_dir", &self.log_dir)
            .field("socket", &self.socket)
            .finish()
    }
}

impl Supervisor {
    pub fn new(
        config: &DutConfig,
        server_ip: &str,
        server_log_store_dir: &std::path::Path,
        stop: StopSignal,
    ) -> Result<Self, SupervisorInitError> {
        let rotator = CommandRotator::from_catalogs(&config.json_files)?;

        let bind_addr = format!("{server_ip}:{}", config.receive_port);
        let socket = UdpSocket::bind(&bind_addr).map_err(|source| SupervisorInitError::Bind {
            addr: bind_addr,
            source,
        })?;
        let _ = socket.set_read_timeout(Some(config.max_timeout_time));

        let power_switch = power_switch::build(config.power_switch_model, config.power_switch_ip.clone());

        Ok(Self {
            dut_id: config.hostname.clone(),
            ip: config.ip.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            power_switch_outlet: config.power_switch_port,
            power_switch,
            boot_waiting_time: config.boot_waiting_time,
            max_timeout_time: config.max_timeout_time,
            disable_os_soft_reboot: config.disable_os_soft_reboot,
            stop,
            state: Arc::new(Mutex::new(SupervisorState {
                events: MachineEvents::new(),
                soft_app_reboot_count: 0,
                soft_os_reboot_count: 0,
                hard_reboot_count: 0,
            })),
            rotator,
            dut_logger: None,
            log_dir: server_log_store_dir.join(&config.hostname),
            socket,
        })
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            dut_id: self.dut_id.clone(),
            benchmark: self.rotator.current().code_name.clone(),
            state: self.state.clone(),
        }
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn open_session(&self, deadline: Duration) -> Result<Session, RemoteShellError> {
        RemoteShell::new(
            self.ip.clone(),
            TELNET_PORT,
            self.username.clone(),
            self.password.clone(),
        )
        .with_session(deadline)
    }

    /// Drives the full lifecycle of this DUT until `stop` is raised.
    pub fn run(&mut self) {
        if let Err(e) = self.power_switch.set(self.power_switch_outlet, PowerState::On) {
            tracing::error!(dut_id = %self.dut_id, error = %e, "failed to turn DUT power on");
        }

        if let Err(e) = self.wait_for_boot() {
            tracing::error!(dut_id = %self.dut_id, error = %e, "DUT did not come up within boot_waiting_time");
        }

        if let Err(e) = self.soft_app_reboot(None) {
            tracing::error!(dut_id = %self.dut_id, error = %e, "initial soft app reboot failed");
        }

        self.with_state(|s| s.events.start_benchmark());

        let mut buf = [0u8; DATA_SIZE];
        while !self.stop.is_stopped() {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => self.handle_datagram(&buf[..n]),
                Err(e) if is_timeout(&e) => {
                    if self.stop.is_stopped() {
                        break;
                    }
                    self.handle_receive_timeout();
                }
                Err(e) => {
                    tracing::error!(dut_id = %self.dut_id, error = %e, "unexpected error reading from DUT socket");
                }
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        if let Some(logger) = self.dut_logger.as_mut() {
            logger.write(datagram);
        }

        let event = EventParser::parse(datagram);
        let is_iteration = matches!(event, Event::Iteration { .. });

        self.with_state(|s| {
            s.events.handle(&event);
            if is_iteration {
                s.soft_app_reboot_count = 0;
                s.hard_reboot_count = 0;
            }
        });

        if self.rotator.is_window_expired() {
            tracing::info!(dut_id = %self.dut_id, "command execution window expired, rotating");
            if let Err(e) = self.soft_app_reboot(Some(EndStatus::NormalEnd)) {
                tracing::warn!(dut_id = %self.dut_id, error = %e, "soft app reboot on window rotation failed");
            }
        }
    }

    fn handle_receive_timeout(&mut self) {
        self.with_state(|s| {
            s.events.end_run();
            s.events.soft_reboot();
        });

        if self.soft_app_reboot(Some(EndStatus::SoftAppReboot)).is_ok() {
            return;
        }

        if self.soft_os_reboot().is_ok() {
            if let Err(e) = self.soft_app_reboot(Some(EndStatus::SoftOsReboot)) {
                tracing::warn!(dut_id = %self.dut_id, error = %e, "soft app reboot after soft OS reboot failed");
            }
            return;
        }

        self.with_state(|s| s.events.hard_reboot());
        if let Err(e) = self.hard_reboot() {
            tracing::error!(dut_id = %self.dut_id, error = %e, "hard reboot failed");
        }
        if let Err(e) = self.soft_app_reboot(Some(EndStatus::HardReboot)) {
            tracing::warn!(dut_id = %self.dut_id, error = %e, "soft app reboot after hard reboot failed");
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SupervisorState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Alternates a cheap TCP connect probe against the telnet port with a full
    /// login attempt: the probe avoids running a whole login dialog against a
    /// port that isn't even accepting connections yet, but only a successful
    /// session open is treated as "the DUT has booted".
    fn wait_for_boot(&self) -> Result<(), SupervisorError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        while start.elapsed() <= self.boot_waiting_time {
            if self.stop.is_stopped() {
                break;
            }

            if should_probe_before_login(attempt) && !self.probe_port(BOOT_PING_TIMEOUT) {
                tracing::debug!(dut_id = %self.dut_id, "boot probe: telnet port not reachable yet");
                attempt += 1;
                let _ = self.stop.wait_timeout(BOOT_PING_TIMEOUT);
                continue;
            }
            attempt += 1;

            match self.open_session(BOOT_PING_TIMEOUT) {
                Ok(_) => {
                    tracing::info!(dut_id = %self.dut_id, "boot check successful");
                    return Ok(());
                }
                Err(RemoteShellError::HostUnreachable(_)) => {
                    let _ = self.stop.wait_timeout(BOOT_PING_TIMEOUT);
                }
                Err(e) => {
                    tracing::debug!(dut_id = %self.dut_id, error = %e, "boot check not ready yet");
                }
            }
        }
        Err(SupervisorError::HostUnreachable)
    }

    /// Bounded, connect-only liveness check against the telnet port; never
    /// performs the login dialog itself.
    fn probe_port(&self, timeout: Duration) -> bool {
        let addr = format!("{}:{TELNET_PORT}", self.ip);
        let Ok(mut addrs) = addr.to_socket_addrs() else {
            return false;
        };
        let Some(sock_addr) = addrs.next() else {
            return false;
        };
        TcpStream::connect_timeout(&sock_addr, timeout).is_ok()
    }

    fn soft_app_reboot(&mut self, previous: Option<EndStatus>) -> Result<(), SupervisorError> {
        if self.stop.is_stopped() {
            return Err(SupervisorError::ThreadEventSet);
        }

        if previous.is_none() != self.dut_logger.is_none() {
            return Err(SupervisorError::InvalidState(
                "previous end status and DUT logger presence disagree".to_string(),
            ));
        }

        let current_count = self.with_state(|s| s.soft_app_reboot_count);
        if current_count >= MAX_SOFT_APP_REBOOTS {
            tracing::info!(dut_id = %self.dut_id, "maximum soft app reboots reached");
            return Err(SupervisorError::MaxAppReboot);
        }

        let run = self.rotator.get_run_commands();

        for try_i in 0..MAX_TELNET_TRIES {
            if self.stop.is_stopped() {
                break;
            }
            match self.open_session(self.max_timeout_time) {
                Ok(mut session) => {
                    let _ = session.write_line(&run.cmd_kill);
                    session.drain();
                    let _ = self.stop.wait_timeout(READ_EAGER);

                    let _ = session.write_line(&run.cmd_exec);
                    session.drain();
                    let _ = self.stop.wait_timeout(READ_EAGER);

                    drop(session);

                    if let Some(logger) = self.dut_logger.take() {
                        logger.finalize(previous.expect("checked above"));
                    }
                    self.dut_logger = Some(DutLogger::open(
                        &self.log_dir,
                        &run.code_name,
                        &run.header,
                        &self.dut_id,
                    ));

                    self.with_state(|s| s.soft_app_reboot_count += 1);
                    tracing::info!(dut_id = %self.dut_id, attempt = try_i, code_name = %run.code_name, "soft app reboot succeeded");
                    return Ok(());
                }
                Err(RemoteShellError::HostUnreachable(_)) => return Err(SupervisorError::HostUnreachable),
                Err(RemoteShellError::TelnetLoginError(_)) => {
                    return Err(SupervisorError::TelnetConnectionError)
                }
                Err(RemoteShellError::Eof) => {
                    tracing::debug!(dut_id = %self.dut_id, attempt = try_i, "session ended before commands completed, retrying");
                }
            }
        }

        Err(SupervisorError::TelnetConnectionError)
    }

    fn soft_os_reboot(&mut self) -> Result<(), SupervisorError> {
        if self.stop.is_stopped() {
            return Err(SupervisorError::ThreadEventSet);
        }
        if self.disable_os_soft_reboot {
            return Err(SupervisorError::DisabledSoftOsReboot);
        }

        let current_count = self.with_state(|s| s.soft_os_reboot_count);
        if current_count >= MAX_SOFT_OS_REBOOTS {
            tracing::info!(dut_id = %self.dut_id, "maximum soft OS reboots reached");
            return Err(SupervisorError::MaxOsReboot);
        }

        match self.open_session(self.max_timeout_time) {
            Ok(mut session) => {
                let _ = session.write_line(b"sudo /sbin/reboot\r\n");
                session.drain();
                let _ = self.stop.wait_timeout(READ_EAGER);
            }
            Err(RemoteShellError::HostUnreachable(_)) => return Err(SupervisorError::HostUnreachable),
            Err(_) => return Err(SupervisorError::TelnetConnectionError),
        }

        let _ = self.stop.wait_timeout(WAIT_AFTER_SOFT_OS_REBOOT);
        self.wait_for_boot()?;

        self.with_state(|s| {
            s.soft_app_reboot_count = 0;
            s.soft_os_reboot_count += 1;
        });
        tracing::info!(dut_id = %self.dut_id, "soft OS reboot succeeded");
        Ok(())
    }

    fn hard_reboot(&mut self) -> Result<(), SupervisorError> {
        if self.stop.is_stopped() {
            return Err(SupervisorError::ThreadEventSet);
        }

        let rest = self.with_state(|s| {
            if s.hard_reboot_count > MAX_HARD_REBOOTS {
                s.hard_reboot_count = 0;
                LONG_REST
            } else {
                s.hard_reboot_count += 1;
                DEFAULT_REST
            }
        });

        tracing::info!(dut_id = %self.dut_id, rest_secs = rest.as_secs(), "performing hard (power cycle) reboot");
        let (off_status, on_status) = self.power_switch.reboot(self.power_switch_outlet, rest, &self.stop);
        if let Err(e) = off_status {
            tracing::error!(dut_id = %self.dut_id, error = %e, "power switch OFF failed during hard reboot");
        }
        if let Err(e) = on_status {
            tracing::error!(dut_id = %self.dut_id, error = %e, "power switch ON failed during hard reboot");
        }

        self.wait_for_boot()?;
        self.with_state(|s| {
            s.soft_app_reboot_count = 0;
            s.soft_os_reboot_count = 0;
        });
        Ok(())
    }
}

/// Every other `wait_for_boot` iteration runs the cheap connect-only probe
/// first; the rest go straight to a full login attempt.
fn should_probe_before_login(attempt: u32) -> bool {
    attempt % 2 == 0
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PowerSwitchModel;
    use std::io::Write;

    fn write_catalog(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("catalog.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"[{"exec": "run", "kill": "kill", "codename": "C", "header": "H"}]"#)
            .unwrap();
        path
    }

    fn sample_config(dir: &tempfile::TempDir, port: u16) -> DutConfig {
        DutConfig {
            ip: "127.0.0.1".to_string(),
            hostname: "dut-test".to_string(),
            username: "root".to_string(),
            password: "pw".to_string(),
            power_switch_ip: "127.0.0.1".to_string(),
            power_switch_port: 1,
            power_switch_model: PowerSwitchModel::Default,
            boot_waiting_time: Duration::from_millis(50),
            max_timeout_time: Duration::from_millis(50),
            receive_port: port,
            json_files: vec![write_catalog(dir)],
            disable_os_soft_reboot: true,
        }
    }

    #[test]
    fn new_fails_on_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let empty_catalog = dir.path().join("empty.json");
        std::fs::write(&empty_catalog, "[]").unwrap();
        let mut config = sample_config(&dir, 17655);
        config.json_files = vec![empty_catalog];

        let stop = StopSignal::new();
        let err = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap_err();
        assert!(matches!(err, SupervisorInitError::Catalog(_)));
    }

    #[test]
    fn boot_probe_alternates_with_a_full_login_attempt_every_other_iteration() {
        assert!(should_probe_before_login(0));
        assert!(!should_probe_before_login(1));
        assert!(should_probe_before_login(2));
        assert!(!should_probe_before_login(3));
    }

    #[test]
    fn probe_port_returns_false_when_nothing_is_listening() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(&dir, 17660);
        let stop = StopSignal::new();
        let supervisor = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap();
        assert!(!supervisor.probe_port(Duration::from_millis(100)));
    }

    #[test]
    fn soft_app_reboot_respects_precondition_between_previous_and_logger() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(&dir, 17656);
        let stop = StopSignal::new();
        let mut supervisor = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap();

        // dut_logger is None, but previous is Some: precondition violated.
        let err = supervisor
            .soft_app_reboot(Some(EndStatus::NormalEnd))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidState(_)));
    }

    #[test]
    fn soft_app_reboot_respects_max_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(&dir, 17657);
        let stop = StopSignal::new();
        let mut supervisor = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap();
        supervisor.with_state(|s| s.soft_app_reboot_count = MAX_SOFT_APP_REBOOTS);

        let err = supervisor.soft_app_reboot(None).unwrap_err();
        assert!(matches!(err, SupervisorError::MaxAppReboot));
    }

    #[test]
    fn soft_os_reboot_returns_disabled_when_configured_off() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(&dir, 17658);
        let stop = StopSignal::new();
        let mut supervisor = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap();

        let err = supervisor.soft_os_reboot().unwrap_err();
        assert!(matches!(err, SupervisorError::DisabledSoftOsReboot));
    }

    #[test]
    fn stop_signal_short_circuits_every_escalation_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(&dir, 17659);
        let stop = StopSignal::new();
        stop.stop();
        let mut supervisor = Supervisor::new(&config, "127.0.0.1", dir.path(), stop).unwrap();

        assert!(matches!(
            supervisor.soft_app_reboot(None),
            Err(SupervisorError::ThreadEventSet)
        ));
        assert!(matches!(
            supervisor.hard_reboot(),
            Err(SupervisorError::ThreadEventSet)
        ));
    }
}
