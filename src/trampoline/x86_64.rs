use super::Trampoline;
use crate::region::ExecutableRegion;

/// `rax` carries the entry pointer and, after the call, the result.
pub struct X86_64Trampoline;

impl X86_64Trampoline {
    pub fn new() -> Self {
        Self
    }
}

impl Default for X86_64Trampoline {
    fn default() -> Self {
        Self::new()
    }
}

impl Trampoline for X86_64Trampoline {
    fn name(&self) -> &'static str {
        "x86_64"
    }

    // Instruction fetch is coherent with stores on x86.
    fn prepare(&self, _region: &ExecutableRegion) {}

    unsafe fn enter(&self, entry: *const u8) -> ! {
        std::arch::asm!(
            "xor ebx, ebx",
            "xor ecx, ecx",
            "xor edx, edx",
            "xor esi, esi",
            "xor edi, edi",
            "xor ebp, ebp",
            "xor r8d, r8d",
            "xor r9d, r9d",
            "xor r10d, r10d",
            "xor r11d, r11d",
            "xor r12d, r12d",
            "xor r13d, r13d",
            "xor r14d, r14d",
            "xor r15d, r15d",
            // SysV wants rsp 16-byte aligned at the call
            "and rsp, -16",
            "int3",
            "call rax",
            "int3",
            "mov rdi, rax",
            "mov eax, {exit_group}",
            "syscall",
            "ud2",
            exit_group = const libc::SYS_exit_group,
            in("rax") entry,
            options(noreturn),
        );
    }
}
