use crate::error::{OutputError, Result};
use crate::event::TraceEvent;
use std::path::Path;

pub mod jsonl;
pub mod terminal;

pub trait OutputSink: Send {
    fn emit(&mut self, event: &TraceEvent) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

pub struct OutputManager {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl OutputManager {
    /// JSONL always goes somewhere (file or stdout); the terminal sink is
    /// added on -v or when JSONL is redirected to a file.
    pub fn new(jsonl_path: Option<&Path>, verbosity: u8, no_color: bool) -> Result<Self> {
        let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();

        match jsonl_path {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(OutputError::Io)?;
                sinks.push(Box::new(jsonl::JsonlSink::new_file(file)));
            }
            None => sinks.push(Box::new(jsonl::JsonlSink::new_stdout())),
        }

        if verbosity > 0 || jsonl_path.is_some() {
            sinks.push(Box::new(terminal::TerminalSink::new(verbosity, no_color)));
        }

        Ok(Self { sinks })
    }

    #[cfg(test)]
    pub fn with_sinks(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn emit_event(&mut self, event: TraceEvent) -> Result<()> {
        for sink in &mut self.sinks {
            sink.emit(&event)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ExitEvent, TraceEvent};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        flushed: Arc<Mutex<bool>>,
    }

    impl OutputSink for Recorder {
        fn emit(&mut self, event: &TraceEvent) -> Result<()> {
            let line = serde_json::to_string(event).map_err(OutputError::Serialize)?;
            self.seen.lock().unwrap().push(line);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            *self.flushed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_event_fans_out_to_every_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let flushed = Arc::new(Mutex::new(false));
        let sinks: Vec<Box<dyn OutputSink>> = (0..2)
            .map(|_| {
                Box::new(Recorder {
                    seen: seen.clone(),
                    flushed: flushed.clone(),
                }) as Box<dyn OutputSink>
            })
            .collect();
        let mut manager = OutputManager::with_sinks(sinks);

        manager
            .emit_event(TraceEvent::Exit(ExitEvent::Exited {
                timestamp: chrono::Utc::now(),
                pid: 1,
                code: 0,
            }))
            .unwrap();
        manager.flush().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("\"event_type\":\"exit\""));
        assert!(*flushed.lock().unwrap());
    }
}
