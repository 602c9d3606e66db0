use nix::unistd::{dup2, pipe};
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::thread::JoinHandle;

use crate::error::{Result, TracerError};

/// Pipes that stand in for the tracee's stdout and stderr, keeping payload
/// writes out of the JSONL stream.
pub struct CapturePipes {
    stdout: (OwnedFd, OwnedFd),
    stderr: (OwnedFd, OwnedFd),
}

impl CapturePipes {
    pub fn new() -> Result<Self> {
        Ok(Self {
            stdout: pipe().map_err(TracerError::Capture)?,
            stderr: pipe().map_err(TracerError::Capture)?,
        })
    }

    /// Child side: point fds 1 and 2 at the write ends.
    pub fn redirect(self) -> Result<()> {
        dup2(self.stdout.1.as_raw_fd(), libc::STDOUT_FILENO).map_err(TracerError::Capture)?;
        dup2(self.stderr.1.as_raw_fd(), libc::STDERR_FILENO).map_err(TracerError::Capture)?;
        Ok(())
    }

    /// Parent side: close the write ends and read both pipes to EOF in the
    /// background so a chatty tracee never blocks on a full pipe.
    pub fn drain(self) -> CapturedOutput {
        let (stdout, _) = self.stdout;
        let (stderr, _) = self.stderr;
        CapturedOutput {
            stdout: spawn_reader(stdout),
            stderr: spawn_reader(stderr),
        }
    }
}

pub struct CapturedOutput {
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
}

impl CapturedOutput {
    /// Wait for EOF on both pipes. Only returns once every copy of the
    /// write ends is closed, i.e. after the tracee is gone.
    pub fn collect(self) -> (String, String) {
        (lossy(self.stdout), lossy(self.stderr))
    }
}

fn spawn_reader(fd: OwnedFd) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = std::fs::File::from(fd).read_to_end(&mut buf) {
            log::warn!("Reading tracee output failed: {}", e);
        }
        buf
    })
}

fn lossy(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_drain_reads_until_writers_close() {
        let pipes = CapturePipes::new().unwrap();
        let mut out = std::fs::File::from(pipes.stdout.1.try_clone().unwrap());
        let mut err = std::fs::File::from(pipes.stderr.1.try_clone().unwrap());

        let captured = pipes.drain();
        out.write_all(b"hello\0").unwrap();
        err.write_all(b"oops").unwrap();
        drop(out);
        drop(err);

        let (stdout, stderr) = captured.collect();
        assert_eq!(stdout, "hello\0");
        assert_eq!(stderr, "oops");
    }
}
