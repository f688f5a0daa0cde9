mod default_switch;
mod lindy;

pub use default_switch::DefaultSwitch;
pub use lindy::LindySwitch;

use std::time::Duration;
use thiserror::Error;

use crate::config::PowerSwitchModel;
use crate::context::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

#[derive(Error, Debug)]
pub enum PowerSwitchError {
    #[error("power switch returned an HTTP error status: {0}")]
    Http(u16),

    #[error("could not connect to power switch: {0}")]
    Connection(String),

    #[error("power switch request timed out")]
    Timeout,

    #[error("power switch request failed: {0}")]
    General(String),
}

/// Capability to flip a numbered outlet on a specific power-switch model. Stateless:
/// every call carries the outlet coordinates it needs, so one `PowerSwitch`
/// implementation can be shared across every DUT behind that switch.
pub trait PowerSwitch {
    fn set(&self, outlet: u8, state: PowerState) -> Result<(), PowerSwitchError>;

    /// OFF, then a caller-driven rest interval, then ON. The rest interval is the
    /// caller's responsibility (the Supervisor sleeps on its stop-signal) so this
    /// capability stays synchronous and has no notion of cancellation.
    fn reboot(
        &self,
        outlet: u8,
        rest: Duration,
        stop: &StopSignal,
    ) -> (Result<(), PowerSwitchError>, Result<(), PowerSwitchError>) {
        let off_status = self.set(outlet, PowerState::Off);
        let _ = stop.wait_timeout(rest);
        let on_status = self.set(outlet, PowerState::On);
        (off_status, on_status)
    }
}

pub fn build(model: PowerSwitchModel, switch_ip: String) -> Box<dyn PowerSwitch + Send + Sync> {
    match model {
        PowerSwitchModel::Lindy => Box::new(LindySwitch::new(switch_ip)),
        PowerSwitchModel::Default => Box::new(DefaultSwitch::new(switch_ip)),
    }
}

/// Maps a ureq transport failure onto our taxonomy. Non-2xx HTTP statuses arrive
/// through the `Status` mapper below, not here.
fn classify_transport_error(err: ureq::Error) -> PowerSwitchError {
    match err {
        ureq::Error::Status(code, _) => PowerSwitchError::Http(code),
        ureq::Error::Transport(t) => match t.kind() {
            ureq::ErrorKind::Io if t.to_string().to_lowercase().contains("timed out") => {
                PowerSwitchError::Timeout
            }
            ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::Dns => {
                PowerSwitchError::Connection(t.to_string())
            }
            _ => PowerSwitchError::General(t.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    struct CountingSwitch {
        calls: Arc<AtomicUsize>,
    }

    impl PowerSwitch for CountingSwitch {
        fn set(&self, _outlet: u8, _state: PowerState) -> Result<(), PowerSwitchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn reboot_turns_off_then_on_with_a_rest_between() {
        let calls = Arc::new(AtomicUsize::new(0));
        let switch = CountingSwitch {
            calls: calls.clone(),
        };
        let stop: StopSignal = Context::new();

        let start = Instant::now();
        let (off, on) = switch.reboot(1, Duration::from_millis(20), &stop);
        assert!(off.is_ok());
        assert!(on.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn reboot_rest_is_cancellable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let switch = CountingSwitch {
            calls: calls.clone(),
        };
        let stop: StopSignal = Context::new();
        let stop_clone = stop.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            stop_clone.stop();
        });

        let start = Instant::now();
        switch.reboot(1, Duration::from_secs(30), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
