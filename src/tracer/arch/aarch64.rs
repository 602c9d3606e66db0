use super::Architecture;
use crate::error::{Result, TracerError};
use crate::event::RegisterSnapshot;
use nix::unistd::Pid;

/// Width of `brk #0`.
const BRK_LEN: u64 = 4;

#[derive(Debug, Clone, Default)]
pub struct UserRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl UserRegs {
    pub fn x(&self, n: usize) -> u64 {
        if n < 31 {
            self.regs[n]
        } else {
            0
        }
    }
}

pub struct Aarch64Arch;

impl Aarch64Arch {
    pub fn new() -> Self {
        Self
    }
}

impl Architecture for Aarch64Arch {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn pc(&self, regs: &UserRegs) -> u64 {
        regs.pc
    }

    // brk is reported with pc still on the instruction
    fn trap_address(&self, regs: &UserRegs) -> u64 {
        regs.pc
    }

    fn code_pointer(&self, regs: &UserRegs) -> u64 {
        regs.x(16)
    }

    fn return_value(&self, regs: &UserRegs) -> u64 {
        regs.x(0)
    }

    fn snapshot(&self, regs: &UserRegs) -> RegisterSnapshot {
        let mut snap: RegisterSnapshot = (0..31).map(|n| (format!("x{n}"), regs.x(n))).collect();
        snap.insert("sp".to_string(), regs.sp);
        snap.insert("pc".to_string(), regs.pc);
        snap.insert("pstate".to_string(), regs.pstate);
        snap
    }

    fn pointer_registers(&self, regs: &UserRegs) -> Vec<(&'static str, u64)> {
        const ARGS: [&str; 8] = ["x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7"];
        let mut pointers = vec![("pc", regs.pc)];
        pointers.extend(ARGS.iter().enumerate().map(|(n, name)| (*name, regs.x(n))));
        pointers.extend([("x29", regs.x(29)), ("x30", regs.x(30)), ("sp", regs.sp)]);
        pointers
    }

    fn skip_breakpoint(&self, pid: Pid, regs: &UserRegs) -> Result<()> {
        let mut moved = regs.clone();
        moved.pc += BRK_LEN;
        write_registers(pid, &moved)
    }
}

pub fn read_registers(pid: Pid) -> Result<UserRegs> {
    use std::mem;

    // On aarch64, use PTRACE_GETREGSET with NT_PRSTATUS
    let mut regs: libc::user_pt_regs = unsafe { mem::zeroed() };

    let iov = libc::iovec {
        iov_base: &mut regs as *mut _ as *mut libc::c_void,
        iov_len: mem::size_of::<libc::user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_raw(),
            libc::NT_PRSTATUS as *mut libc::c_void,
            &iov as *const _,
        )
    };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    let mut user_regs = UserRegs {
        regs: [0; 31],
        sp: regs.sp,
        pc: regs.pc,
        pstate: regs.pstate,
    };
    user_regs.regs.copy_from_slice(&regs.regs[..31]);

    Ok(user_regs)
}

pub fn write_registers(pid: Pid, regs: &UserRegs) -> Result<()> {
    let libc_regs = libc::user_pt_regs {
        regs: regs.regs,
        sp: regs.sp,
        pc: regs.pc,
        pstate: regs.pstate,
    };

    let iov = libc::iovec {
        iov_base: &libc_regs as *const _ as *mut libc::c_void,
        iov_len: std::mem::size_of::<libc::user_pt_regs>(),
    };

    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET,
            pid.as_raw(),
            libc::NT_PRSTATUS as *mut libc::c_void,
            &iov as *const _,
        )
    };

    if res < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_pointer_and_result_registers() {
        let arch = Aarch64Arch::new();
        let mut regs = UserRegs::default();
        regs.regs[16] = 0x1337_0000;
        regs.regs[0] = 42;
        assert_eq!(arch.code_pointer(&regs), 0x1337_0000);
        assert_eq!(arch.return_value(&regs), 42);
        assert_eq!(arch.snapshot(&regs)["x16"], 0x1337_0000);
        assert_eq!(arch.pointer_registers(&regs)[1], ("x0", 42));
    }
}
