use super::Architecture;
use crate::error::{Result, TracerError};
use crate::event::RegisterSnapshot;
use nix::unistd::Pid;

#[derive(Debug, Clone, Default)]
pub struct UserRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rip: u64,
    pub eflags: u64,
    pub rsp: u64,
}

pub struct X86_64Arch;

impl X86_64Arch {
    pub fn new() -> Self {
        Self
    }
}

impl Architecture for X86_64Arch {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    fn pc(&self, regs: &UserRegs) -> u64 {
        regs.rip
    }

    // int3 is a trap: rip already points past the one-byte instruction
    fn trap_address(&self, regs: &UserRegs) -> u64 {
        regs.rip.wrapping_sub(1)
    }

    fn code_pointer(&self, regs: &UserRegs) -> u64 {
        regs.rax
    }

    fn return_value(&self, regs: &UserRegs) -> u64 {
        regs.rax
    }

    fn snapshot(&self, regs: &UserRegs) -> RegisterSnapshot {
        [
            ("rax", regs.rax),
            ("rbx", regs.rbx),
            ("rcx", regs.rcx),
            ("rdx", regs.rdx),
            ("rsi", regs.rsi),
            ("rdi", regs.rdi),
            ("rbp", regs.rbp),
            ("rsp", regs.rsp),
            ("r8", regs.r8),
            ("r9", regs.r9),
            ("r10", regs.r10),
            ("r11", regs.r11),
            ("r12", regs.r12),
            ("r13", regs.r13),
            ("r14", regs.r14),
            ("r15", regs.r15),
            ("rip", regs.rip),
            ("eflags", regs.eflags),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    fn pointer_registers(&self, regs: &UserRegs) -> Vec<(&'static str, u64)> {
        vec![
            ("rip", regs.rip),
            ("rax", regs.rax),
            ("rbx", regs.rbx),
            ("rcx", regs.rcx),
            ("rdx", regs.rdx),
            ("rsi", regs.rsi),
            ("rdi", regs.rdi),
            ("rbp", regs.rbp),
            ("rsp", regs.rsp),
        ]
    }

    fn skip_breakpoint(&self, _pid: Pid, _regs: &UserRegs) -> Result<()> {
        Ok(())
    }
}

pub fn read_registers(pid: Pid) -> Result<UserRegs> {
    use std::mem;

    let mut regs: libc::user_regs_struct = unsafe { mem::zeroed() };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGS,
            pid.as_raw(),
            0,
            &mut regs as *mut _,
        )
    };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    Ok(UserRegs {
        r15: regs.r15,
        r14: regs.r14,
        r13: regs.r13,
        r12: regs.r12,
        rbp: regs.rbp,
        rbx: regs.rbx,
        r11: regs.r11,
        r10: regs.r10,
        r9: regs.r9,
        r8: regs.r8,
        rax: regs.rax,
        rcx: regs.rcx,
        rdx: regs.rdx,
        rsi: regs.rsi,
        rdi: regs.rdi,
        rip: regs.rip,
        eflags: regs.eflags,
        rsp: regs.rsp,
    })
}
