use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::unistd::alarm;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, WatchdogError};

/// Set once the process-wide alarm has been armed.
static ARMED: AtomicBool = AtomicBool::new(false);

/// How long the payload may run, in whole seconds. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogDeadline {
    secs: u32,
}

impl WatchdogDeadline {
    pub fn new(secs: u32) -> Result<Self> {
        if secs == 0 {
            return Err(WatchdogError::InvalidDuration.into());
        }
        Ok(Self { secs })
    }

    pub fn secs(&self) -> u32 {
        self.secs
    }
}

/// An armed SIGALRM timer. There is no way to cancel or extend it; when it
/// expires the default disposition terminates the process.
#[derive(Debug)]
pub struct Watchdog {
    deadline: WatchdogDeadline,
}

impl Watchdog {
    /// Arm the process alarm. Fails if a watchdog was already armed.
    pub fn arm(deadline: WatchdogDeadline) -> Result<Self> {
        arm_once(&ARMED, deadline, || {
            // An inherited SIG_IGN or blocked mask would silently disable
            // the timeout.
            unsafe { signal::signal(Signal::SIGALRM, SigHandler::SigDfl) }
                .map_err(WatchdogError::Signal)?;
            let mut mask = SigSet::empty();
            mask.add(Signal::SIGALRM);
            mask.thread_unblock().map_err(WatchdogError::Signal)?;
            Ok(alarm::set(deadline.secs()))
        })
    }

    pub fn deadline(&self) -> WatchdogDeadline {
        self.deadline
    }
}

fn arm_once<F>(guard: &AtomicBool, deadline: WatchdogDeadline, set_alarm: F) -> Result<Watchdog>
where
    F: FnOnce() -> std::result::Result<Option<u32>, WatchdogError>,
{
    if guard
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(WatchdogError::AlreadyArmed.into());
    }

    if let Some(previous) = set_alarm()? {
        log::debug!("Replaced a pending alarm with {}s remaining", previous);
    }
    log::debug!("Watchdog armed for {}s", deadline.secs());

    Ok(Watchdog { deadline })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_zero_deadline_rejected() {
        assert!(matches!(
            WatchdogDeadline::new(0),
            Err(HarnessError::Watchdog(WatchdogError::InvalidDuration))
        ));
        assert_eq!(WatchdogDeadline::new(10).unwrap().secs(), 10);
    }

    #[test]
    fn test_arms_exactly_once() {
        let guard = AtomicBool::new(false);
        let deadline = WatchdogDeadline::new(5).unwrap();
        let mut calls = 0;

        let dog = arm_once(&guard, deadline, || {
            calls += 1;
            Ok(None)
        })
        .unwrap();
        assert_eq!(dog.deadline().secs(), 5);

        let second = arm_once(&guard, deadline, || {
            calls += 1;
            Ok(None)
        });
        assert!(matches!(
            second,
            Err(HarnessError::Watchdog(WatchdogError::AlreadyArmed))
        ));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_signal_failure_propagates() {
        let guard = AtomicBool::new(false);
        let deadline = WatchdogDeadline::new(1).unwrap();
        let result = arm_once(&guard, deadline, || {
            Err(WatchdogError::Signal(nix::Error::EINVAL))
        });
        assert!(matches!(
            result,
            Err(HarnessError::Watchdog(WatchdogError::Signal(_)))
        ));
    }
}
