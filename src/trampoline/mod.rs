//! Per-architecture control transfer into the code region.
//!
//! Every implementation follows the same protocol: zero the general-purpose
//! registers except the one carrying the entry pointer, raise a breakpoint,
//! call the entry point, raise a second breakpoint, then `exit_group` with
//! the return-value register as status. The two breakpoints are the only
//! synchronization an attached debugger gets.

use crate::region::ExecutableRegion;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

pub trait Trampoline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make freshly written code visible to instruction fetch.
    fn prepare(&self, region: &ExecutableRegion);

    /// Transfer control to `entry` and never come back.
    ///
    /// # Safety
    ///
    /// `entry` must point into an executable mapping. Whatever the code
    /// there does runs with the full privileges of this process.
    unsafe fn enter(&self, entry: *const u8) -> !;
}

pub fn detect() -> Box<dyn Trampoline> {
    #[cfg(target_arch = "x86_64")]
    {
        Box::new(x86_64::X86_64Trampoline::new())
    }

    #[cfg(target_arch = "aarch64")]
    {
        Box::new(aarch64::Aarch64Trampoline::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_matches_target() {
        let trampoline = detect();
        assert_eq!(trampoline.name(), std::env::consts::ARCH);
    }
}
