use std::convert::Infallible;

use crate::config::HarnessConfig;
use crate::decoder::RawCodeBuffer;
use crate::error::Result;
use crate::region::ExecutableRegion;
use crate::trampoline;
use crate::watchdog::{Watchdog, WatchdogDeadline};

/// Map `code`, arm the watchdog and jump into it.
///
/// Only returns on a setup failure. Once the trampoline is entered the
/// process ends either through `exit_group` with the payload's result,
/// through the watchdog's SIGALRM, or through whatever the payload does.
pub fn run(config: &HarnessConfig, code: &RawCodeBuffer) -> Result<Infallible> {
    let trampoline = trampoline::detect();
    let deadline = WatchdogDeadline::new(config.timeout_secs)?;

    let region = ExecutableRegion::map(code, config.load_address)?;
    trampoline.prepare(&region);

    let watchdog = Watchdog::arm(deadline)?;
    log::debug!(
        "Entering {} bytes at {:#x} via {} trampoline, {}s budget",
        region.len(),
        region.base(),
        trampoline.name(),
        watchdog.deadline().secs()
    );

    unsafe { trampoline.enter(region.entry()) }
}
