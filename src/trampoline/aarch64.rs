use super::Trampoline;
use crate::region::ExecutableRegion;

/// `x16` carries the entry pointer; `x0` holds the result.
pub struct Aarch64Trampoline;

impl Aarch64Trampoline {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Aarch64Trampoline {
    fn default() -> Self {
        Self::new()
    }
}

impl Trampoline for Aarch64Trampoline {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn prepare(&self, region: &ExecutableRegion) {
        use std::arch::asm;

        let start = region.base();
        let end = start + region.len() as u64;

        // CTR_EL0 encodes log2(words) of the smallest D and I cache lines
        let ctr: u64;
        unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack)) };
        let dline = 4u64 << ((ctr >> 16) & 0xf);
        let iline = 4u64 << (ctr & 0xf);

        unsafe {
            let mut addr = start & !(dline - 1);
            while addr < end {
                asm!("dc cvau, {}", in(reg) addr, options(nostack));
                addr += dline;
            }
            asm!("dsb ish", options(nostack));

            let mut addr = start & !(iline - 1);
            while addr < end {
                asm!("ic ivau, {}", in(reg) addr, options(nostack));
                addr += iline;
            }
            asm!("dsb ish", "isb", options(nostack));
        }
    }

    unsafe fn enter(&self, entry: *const u8) -> ! {
        std::arch::asm!(
            "mov x0, xzr",
            "mov x1, xzr",
            "mov x2, xzr",
            "mov x3, xzr",
            "mov x4, xzr",
            "mov x5, xzr",
            "mov x6, xzr",
            "mov x7, xzr",
            "mov x8, xzr",
            "mov x9, xzr",
            "mov x10, xzr",
            "mov x11, xzr",
            "mov x12, xzr",
            "mov x13, xzr",
            "mov x14, xzr",
            "mov x15, xzr",
            "mov x17, xzr",
            "mov x18, xzr",
            "mov x19, xzr",
            "mov x20, xzr",
            "mov x21, xzr",
            "mov x22, xzr",
            "mov x23, xzr",
            "mov x24, xzr",
            "mov x25, xzr",
            "mov x26, xzr",
            "mov x27, xzr",
            "mov x28, xzr",
            "mov x29, xzr",
            "mov x30, xzr",
            // brk does not advance pc; the debugger steps over it
            "brk #0",
            "blr x16",
            "brk #0",
            "mov x8, #{exit_group}",
            "svc #0",
            exit_group = const libc::SYS_exit_group,
            in("x16") entry,
            options(noreturn),
        );
    }
}
