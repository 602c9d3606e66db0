use std::io::{self, BufWriter, Write};

use super::OutputSink;
use crate::error::{OutputError, Result};
use crate::event::TraceEvent;

/// JSONL output sink - one JSON object per line.
pub struct JsonlSink {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn new_file(file: std::fs::File) -> Self {
        Self::new_writer(Box::new(file))
    }

    pub fn new_stdout() -> Self {
        Self::new_writer(Box::new(io::stdout()))
    }

    pub fn new_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }
}

impl OutputSink for JsonlSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event).map_err(OutputError::Serialize)?;
        self.writer.write_all(b"\n").map_err(OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(OutputError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SignalEvent;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_one_object_per_line() {
        let buf = SharedBuf::default();
        let mut sink = JsonlSink::new_writer(Box::new(buf.clone()));
        for pc in [0x10u64, 0x20] {
            sink.emit(&TraceEvent::Signal(SignalEvent {
                timestamp: chrono::Utc::now(),
                pid: 1,
                signal: "SIGSEGV".into(),
                pc,
            }))
            .unwrap();
        }
        sink.flush().unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event_type"], "signal");
        assert_eq!(second["pc"], 0x20);
    }
}
