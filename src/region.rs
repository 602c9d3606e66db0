use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use crate::decoder::RawCodeBuffer;
use crate::error::{AllocationFailure, DecodeError, Result};

/// An anonymous read/write/execute mapping holding a copy of the payload.
///
/// The mapping is never re-protected after the copy. Dropping the region
/// unmaps it, which only happens in tests since the trampoline never
/// returns.
#[derive(Debug)]
pub struct ExecutableRegion {
    base: NonNull<c_void>,
    len: NonZeroUsize,
}

impl ExecutableRegion {
    /// Map `code.len()` bytes RWX, preferably at `hint`, and copy `code` in.
    ///
    /// The hint is passed without `MAP_FIXED`; the kernel may place the
    /// mapping elsewhere, which is logged but not an error.
    pub fn map(code: &RawCodeBuffer, hint: Option<u64>) -> Result<Self> {
        let len = NonZeroUsize::new(code.len()).ok_or(DecodeError::Empty)?;
        let base = reserve(len, hint)?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                code.as_bytes().as_ptr(),
                base.as_ptr() as *mut u8,
                len.get(),
            );
        }

        let region = Self { base, len };
        match hint {
            Some(h) if h != region.base() => {
                log::info!(
                    "Kernel placed code at {:#x} instead of requested {:#x}",
                    region.base(),
                    h
                );
            }
            _ => log::debug!("Mapped {} bytes at {:#x}", region.len(), region.base()),
        }
        Ok(region)
    }

    pub fn base(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn entry(&self) -> *const u8 {
        self.base.as_ptr() as *const u8
    }

    #[cfg(test)]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base() && addr - self.base() < self.len() as u64
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.entry(), self.len()) }
    }
}

fn reserve(len: NonZeroUsize, hint: Option<u64>) -> Result<NonNull<c_void>> {
    let addr = hint.and_then(|h| NonZeroUsize::new(h as usize));
    let base = unsafe {
        mmap_anonymous(
            addr,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
            MapFlags::MAP_SHARED,
        )
    }
    .map_err(|source| AllocationFailure {
        size: len.get(),
        hint: match hint {
            Some(h) => format!("{:#x}", h),
            None => "none".to_string(),
        },
        source,
    })?;
    Ok(base)
}

impl Drop for ExecutableRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.base, self.len.get()) } {
            log::warn!("munmap of code region at {:#x} failed: {}", self.base(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OddLengthPolicy, DEFAULT_LOAD_ADDRESS};
    use crate::decoder::decode;
    use crate::error::HarnessError;

    fn buffer(hex: &str) -> RawCodeBuffer {
        decode(hex, OddLengthPolicy::Reject).unwrap()
    }

    #[test]
    fn test_map_copies_bytes_at_offset_zero() {
        let code = buffer("b82a000000c3");
        let region = ExecutableRegion::map(&code, None).unwrap();
        assert_eq!(region.len(), 6);
        assert_eq!(region.as_slice(), code.as_bytes());
        assert_ne!(region.base(), 0);
    }

    #[test]
    fn test_contains_covers_exactly_the_payload() {
        let region = ExecutableRegion::map(&buffer("90909090c3"), None).unwrap();
        let base = region.base();
        assert!(region.contains(base));
        assert!(region.contains(base + 4));
        assert!(!region.contains(base + 5));
        assert!(!region.contains(base.wrapping_sub(1)));
    }

    #[test]
    fn test_hint_is_not_a_guarantee() {
        // Whether or not the kernel honors the hint, the copy must land at
        // whatever base was granted.
        let code = buffer("31c0c3");
        let region = ExecutableRegion::map(&code, Some(0x2468_0000)).unwrap();
        assert_eq!(region.as_slice(), code.as_bytes());
    }

    #[test]
    fn test_occupied_hint_falls_back() {
        let code = buffer("c3");
        let first = ExecutableRegion::map(&code, None).unwrap();
        let second = ExecutableRegion::map(&code, Some(first.base())).unwrap();
        assert_ne!(second.base(), first.base());
        assert_eq!(second.as_slice(), &[0xc3]);
    }

    #[test]
    fn test_unusable_hint_falls_back() {
        // Beyond the user address space; the kernel must ignore it
        let region = ExecutableRegion::map(&buffer("c3"), Some(u64::MAX & !0xfff)).unwrap();
        assert_eq!(region.as_slice(), &[0xc3]);
    }

    #[test]
    fn test_unsatisfiable_mapping_is_allocation_failure() {
        // Larger than any user address space
        let len = NonZeroUsize::new(1 << 62).unwrap();
        match reserve(len, Some(DEFAULT_LOAD_ADDRESS)) {
            Err(HarnessError::Allocation(AllocationFailure { size, hint, .. })) => {
                assert_eq!(size, 1 << 62);
                assert_eq!(hint, "0x13370000");
            }
            other => panic!("expected an allocation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_allocation_failure_message() {
        let err = reserve(NonZeroUsize::new(1 << 62).unwrap(), None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("executable memory"), "{}", message);
        assert!(message.contains("hint none"), "{}", message);
    }

    #[test]
    fn test_region_is_executable() {
        let region = ExecutableRegion::map(&buffer("c3"), None).unwrap();
        let maps = std::fs::read_to_string("/proc/self/maps").unwrap();
        let start = format!("{:x}-", region.base());
        let line = maps
            .lines()
            .find(|l| l.starts_with(&start))
            .expect("mapping listed in /proc/self/maps");
        assert!(line.contains("rwxs"), "unexpected permissions: {}", line);
    }
}
