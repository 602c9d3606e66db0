use crate::error::Result;
use crate::event::RegisterSnapshot;
use nix::unistd::Pid;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::{read_registers, UserRegs};
#[cfg(target_arch = "x86_64")]
pub use x86_64::{read_registers, UserRegs};

/// Register conventions of the harness trampoline on one architecture.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &'static str;
    fn pc(&self, regs: &UserRegs) -> u64;
    /// Address of the breakpoint instruction that caused the current stop.
    fn trap_address(&self, regs: &UserRegs) -> u64;
    /// Register the trampoline loads with the entry point.
    fn code_pointer(&self, regs: &UserRegs) -> u64;
    /// Register holding the payload's result after it returns.
    fn return_value(&self, regs: &UserRegs) -> u64;
    fn snapshot(&self, regs: &UserRegs) -> RegisterSnapshot;
    /// Registers worth dereferencing, program counter first.
    fn pointer_registers(&self, regs: &UserRegs) -> Vec<(&'static str, u64)>;
    /// Move the tracee past a breakpoint if the CPU left pc on it.
    fn skip_breakpoint(&self, pid: Pid, regs: &UserRegs) -> Result<()>;
}

pub fn detect_architecture() -> Box<dyn Architecture> {
    #[cfg(target_arch = "x86_64")]
    {
        Box::new(x86_64::X86_64Arch::new())
    }

    #[cfg(target_arch = "aarch64")]
    {
        Box::new(aarch64::Aarch64Arch::new())
    }
}
