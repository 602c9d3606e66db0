use crate::error::{Result, TracerError};
use nix::unistd::Pid;

/// Read data from tracee memory
/// Primary: process_vm_readv (fast)
/// Fallback: ptrace::read (slower, word by word)
///
/// Short reads are returned as-is when the range runs off the end of a
/// mapping.
pub fn read_memory(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    match read_memory_process_vm(pid, addr, len) {
        Ok(data) => return Ok(data),
        Err(e) => {
            log::debug!("process_vm_readv failed, falling back to ptrace: {}", e);
        }
    }

    read_memory_ptrace(pid, addr, len)
}

fn read_memory_process_vm(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];

    let local_iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: len,
    };
    let remote_iov = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: len,
    };

    let res = unsafe { libc::process_vm_readv(pid.as_raw(), &local_iov, 1, &remote_iov, 1, 0) };

    if res < 0 {
        return Err(TracerError::MemoryRead {
            addr,
            source: std::io::Error::last_os_error(),
        }
        .into());
    }

    buf.truncate(res as usize);
    Ok(buf)
}

fn read_memory_ptrace(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    let mut current_addr = addr;

    while buf.len() < len {
        match nix::sys::ptrace::read(pid, current_addr as *mut libc::c_void) {
            Ok(word) => {
                let bytes = word.to_le_bytes();
                let remaining = len - buf.len();
                let to_copy = std::cmp::min(remaining, 8);
                buf.extend_from_slice(&bytes[..to_copy]);
                current_addr += 8;
            }
            Err(e) => {
                // Partial read is okay if we got some data
                if buf.is_empty() {
                    return Err(TracerError::MemoryRead {
                        addr,
                        source: std::io::Error::from(e),
                    }
                    .into());
                }
                break;
            }
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_own_memory() {
        let data: [u8; 12] = *b"trapline-mem";
        let pid = nix::unistd::getpid();
        let read = read_memory(pid, data.as_ptr() as u64, data.len()).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn test_unmapped_address_is_error() {
        let pid = nix::unistd::getpid();
        assert!(read_memory_process_vm(pid, 8, 16).is_err());
    }
}
