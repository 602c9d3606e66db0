/// Where the tracee is in the trampoline protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracePhase {
    /// Harness setup, before the first trap
    Pre,
    /// Inside the payload, between the traps
    Running,
    /// Payload returned, waiting for exit
    Post,
}

/// What a breakpoint stop means given the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Pre,
    Post,
    Payload,
    /// A breakpoint after the post trap; the harness never emits one
    Unexpected,
}

#[derive(Debug)]
pub struct TraceState {
    pub phase: TracePhase,
    pub base: Option<u64>,
    pub len: usize,
    pub trap_count: u64,
    pub step_count: u64,
    pub steps_truncated: bool,
    pub stepping: bool,
}

impl TraceState {
    pub fn new(len: usize) -> Self {
        Self {
            phase: TracePhase::Pre,
            base: None,
            len,
            trap_count: 0,
            step_count: 0,
            steps_truncated: false,
            stepping: false,
        }
    }

    pub fn in_region(&self, addr: u64) -> bool {
        match self.base {
            Some(base) => addr >= base && addr - base < self.len as u64,
            None => false,
        }
    }

    /// Classify a breakpoint at `addr` and advance the phase.
    pub fn on_breakpoint(&mut self, addr: u64) -> TrapKind {
        self.trap_count += 1;
        match self.phase {
            TracePhase::Pre => {
                self.phase = TracePhase::Running;
                TrapKind::Pre
            }
            TracePhase::Running if self.in_region(addr) => TrapKind::Payload,
            TracePhase::Running => {
                self.phase = TracePhase::Post;
                self.stepping = false;
                TrapKind::Post
            }
            TracePhase::Post => TrapKind::Unexpected,
        }
    }

    /// Count a recorded step; returns false once the cap is reached.
    pub fn record_step(&mut self, max_steps: usize) -> bool {
        if self.step_count as usize >= max_steps {
            self.steps_truncated = true;
            self.stepping = false;
            return false;
        }
        self.step_count += 1;
        true
    }
}
