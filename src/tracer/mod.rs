use crate::config::HarnessConfig;
use crate::decoder::RawCodeBuffer;
use crate::error::{Result, TracerError};
use crate::event::{
    ExitEvent, OutputEvent, RegionInfo, RegisterAnalysis, SignalEvent, StepEvent, TraceEvent,
    TraceSummary, TrapEvent, TrapPhase,
};
use crate::harness;
use crate::output::OutputManager;
use nix::sys::ptrace;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::time::Instant;

pub mod analysis;
pub mod arch;
pub mod capture;
pub mod memory;
pub mod state;

use arch::{Architecture, UserRegs};
use capture::{CapturePipes, CapturedOutput};
use state::{TraceState, TrapKind};

/// si_code of a SIGTRAP raised by a completed single step.
const TRAP_TRACE: i32 = 2;

/// How the traced harness ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Exited(i32),
    Signaled(Signal),
}

impl TraceOutcome {
    /// Terminate this process the way the tracee terminated, so callers of
    /// `--trace` see the same status as callers of a plain run.
    pub fn mirror(self) -> ! {
        match self {
            TraceOutcome::Exited(code) => std::process::exit(code),
            TraceOutcome::Signaled(sig) => {
                // No core file for a re-raised SIGSEGV/SIGTRAP
                let _ = setrlimit(Resource::RLIMIT_CORE, 0, 0);
                let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
                let mut mask = SigSet::empty();
                mask.add(sig);
                let _ = mask.thread_unblock();
                let _ = signal::raise(sig);
                std::process::exit(128 + sig as i32)
            }
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, TraceOutcome::Signaled(Signal::SIGALRM))
    }
}

/// Runs the harness in a forked child under ptrace and reports what it
/// observes at each trap.
pub struct Tracer {
    config: HarnessConfig,
    code: RawCodeBuffer,
    output: OutputManager,
    architecture: Box<dyn Architecture>,
    start_time: Instant,
}

impl Tracer {
    pub fn new(config: HarnessConfig, code: RawCodeBuffer, output: OutputManager) -> Self {
        Self {
            config,
            code,
            output,
            architecture: arch::detect_architecture(),
            start_time: Instant::now(),
        }
    }

    pub fn run(&mut self) -> Result<TraceOutcome> {
        let pipes = CapturePipes::new()?;
        match unsafe { fork() } {
            Ok(ForkResult::Child) => self.run_child(pipes),
            Ok(ForkResult::Parent { child }) => self.run_tracer(child, pipes.drain()),
            Err(e) => Err(TracerError::Fork(e).into()),
        }
    }

    fn run_child(&self, pipes: CapturePipes) -> ! {
        if let Err(e) = pipes.redirect() {
            eprintln!("Failed to capture output: {}", e);
            std::process::exit(1);
        }

        if let Err(e) = request_trace() {
            eprintln!("Failed to request tracing: {}", e);
            std::process::exit(1);
        }

        match harness::run(&self.config, &self.code) {
            Ok(never) => match never {},
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }

    fn run_tracer(&mut self, child: Pid, captured: CapturedOutput) -> Result<TraceOutcome> {
        // Wait for child to stop (SIGSTOP from traceme)
        let status = waitpid(child, None).map_err(TracerError::Wait)?;
        match status {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                log::debug!("Child {} stopped, starting trace", child);
            }
            other => {
                return Err(TracerError::UnexpectedStop(format!("{:?}", other)).into());
            }
        }

        ptrace::setoptions(child, ptrace::Options::PTRACE_O_EXITKILL)
            .map_err(TracerError::Ptrace)?;
        ptrace::cont(child, None).map_err(TracerError::Ptrace)?;

        let mut state = TraceState::new(self.code.len());
        match self.trace_loop(child, &mut state) {
            Ok(outcome) => {
                let (stdout, stderr) = captured.collect();
                self.output.emit_event(TraceEvent::Output(OutputEvent {
                    timestamp: chrono::Utc::now(),
                    pid: child.as_raw(),
                    stdout,
                    stderr,
                }))?;
                self.emit_summary(&state, outcome)?;
                self.output.flush()?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = signal::kill(child, Signal::SIGKILL);
                let _ = self.output.flush();
                Err(e)
            }
        }
    }

    fn trace_loop(&mut self, child: Pid, state: &mut TraceState) -> Result<TraceOutcome> {
        loop {
            let status = waitpid(child, None).map_err(TracerError::Wait)?;

            match status {
                WaitStatus::Stopped(pid, Signal::SIGTRAP) => {
                    self.handle_sigtrap(pid, state)?;
                }
                WaitStatus::Stopped(pid, signal) => {
                    self.handle_signal(pid, signal, state)?;
                }
                WaitStatus::Exited(pid, code) => {
                    self.output.emit_event(TraceEvent::Exit(ExitEvent::Exited {
                        timestamp: chrono::Utc::now(),
                        pid: pid.as_raw(),
                        code,
                    }))?;
                    return Ok(TraceOutcome::Exited(code));
                }
                WaitStatus::Signaled(pid, signal, _) => {
                    self.output.emit_event(TraceEvent::Exit(ExitEvent::Signaled {
                        timestamp: chrono::Utc::now(),
                        pid: pid.as_raw(),
                        signal: signal.as_str().to_string(),
                        reason: exit_reason(TraceOutcome::Signaled(signal)),
                    }))?;
                    return Ok(TraceOutcome::Signaled(signal));
                }
                WaitStatus::PtraceEvent(pid, _, _) => {
                    resume(pid, state, None)?;
                }
                _ => {}
            }
        }
    }

    fn handle_sigtrap(&mut self, pid: Pid, state: &mut TraceState) -> Result<()> {
        let info = ptrace::getsiginfo(pid).map_err(TracerError::Ptrace)?;

        // kill(2)/tgkill(2) from the payload, not a CPU trap
        if info.si_code <= 0 {
            return self.handle_signal(pid, Signal::SIGTRAP, state);
        }

        let regs = arch::read_registers(pid)?;

        if info.si_code == TRAP_TRACE {
            if state.stepping {
                self.handle_step(pid, &regs, state)?;
            }
            return resume(pid, state, None);
        }

        let addr = self.architecture.trap_address(&regs);
        let kind = state.on_breakpoint(addr);
        let mut event = TrapEvent {
            timestamp: chrono::Utc::now(),
            pid: pid.as_raw(),
            phase: TrapPhase::Payload,
            pc: addr,
            registers: self.architecture.snapshot(&regs),
            analysis: self.analyze(pid, &regs),
            code_pointer: None,
            return_value: None,
            region: None,
        };

        match kind {
            TrapKind::Pre => {
                let base = self.architecture.code_pointer(&regs);
                state.base = Some(base);
                state.stepping = self.config.trace.step;
                event.phase = TrapPhase::Pre;
                event.code_pointer = Some(base);
                event.region = self.read_region(pid, base);
                log::debug!("Pre-execution trap, code at {:#x}", base);
            }
            TrapKind::Post => {
                event.phase = TrapPhase::Post;
                event.return_value = Some(self.architecture.return_value(&regs));
                log::debug!("Post-execution trap at {:#x}", addr);
            }
            TrapKind::Payload => {
                log::debug!("Breakpoint inside payload at {:#x}", addr);
            }
            TrapKind::Unexpected => {
                log::warn!("Breakpoint after the post-execution trap at {:#x}", addr);
            }
        }

        self.output.emit_event(TraceEvent::Trap(event))?;
        self.architecture.skip_breakpoint(pid, &regs)?;

        // The breakpoint stop replaced the step stop at the next instruction
        if kind == TrapKind::Payload && state.stepping {
            let after = arch::read_registers(pid)?;
            self.handle_step(pid, &after, state)?;
        }
        resume(pid, state, None)
    }

    /// Every stop is executed, but only those passing the visibility
    /// filter are reported. By default that is the code region.
    fn handle_step(&mut self, pid: Pid, regs: &UserRegs, state: &mut TraceState) -> Result<()> {
        let pc = self.architecture.pc(regs);
        let base = match state.base {
            Some(base) => base,
            None => return Ok(()),
        };
        let in_region = state.in_region(pc);
        if !self.config.trace.visibility.is_visible(pc, in_region) {
            return Ok(());
        }

        if !state.record_step(self.config.trace.max_steps) {
            log::info!(
                "Step cap of {} reached, continuing without stepping",
                self.config.trace.max_steps
            );
            return Ok(());
        }

        let bytes = memory::read_memory(pid, pc, self.config.trace.snippet_length)
            .map(hex::encode)
            .unwrap_or_default();

        self.output.emit_event(TraceEvent::Step(StepEvent {
            timestamp: chrono::Utc::now(),
            pid: pid.as_raw(),
            index: state.step_count - 1,
            pc,
            offset: in_region.then(|| pc - base),
            bytes,
            registers: self.architecture.snapshot(regs),
            analysis: self.analyze(pid, regs),
        }))
    }

    fn analyze(&self, pid: Pid, regs: &UserRegs) -> RegisterAnalysis {
        analysis::analyze_registers(
            pid,
            &self.architecture.pointer_registers(regs),
            self.config.trace.snippet_length,
            self.config.trace.min_string_length,
        )
    }

    fn handle_signal(&mut self, pid: Pid, signal: Signal, state: &mut TraceState) -> Result<()> {
        let pc = arch::read_registers(pid)
            .map(|regs| self.architecture.pc(&regs))
            .unwrap_or_default();

        self.output.emit_event(TraceEvent::Signal(SignalEvent {
            timestamp: chrono::Utc::now(),
            pid: pid.as_raw(),
            signal: signal.as_str().to_string(),
            pc,
        }))?;

        // Pass signal through to tracee
        resume(pid, state, Some(signal))
    }

    fn read_region(&self, pid: Pid, base: u64) -> Option<RegionInfo> {
        match memory::read_memory(pid, base, self.code.len()) {
            Ok(bytes) => Some(RegionInfo {
                base,
                len: self.code.len(),
                bytes: hex::encode(bytes),
            }),
            Err(e) => {
                log::warn!("Could not read code region at {:#x}: {}", base, e);
                None
            }
        }
    }

    fn emit_summary(&mut self, state: &TraceState, outcome: TraceOutcome) -> Result<()> {
        let (exit_code, signal) = match outcome {
            TraceOutcome::Exited(code) => (Some(code), None),
            TraceOutcome::Signaled(sig) => (None, Some(sig.as_str().to_string())),
        };

        let summary = TraceSummary {
            timestamp: chrono::Utc::now(),
            arch: self.architecture.name().to_string(),
            trap_count: state.trap_count,
            step_count: state.step_count,
            steps_truncated: state.steps_truncated,
            exit_code,
            signal,
            timed_out: outcome.timed_out(),
            base_address: state.base,
            duration_ms: self.start_time.elapsed().as_millis() as u64,
            reason: exit_reason(outcome),
        };

        self.output.emit_event(TraceEvent::Summary(summary))
    }
}

fn request_trace() -> Result<()> {
    ptrace::traceme().map_err(TracerError::Ptrace)?;

    // Raise SIGSTOP to wait for tracer to attach
    signal::raise(Signal::SIGSTOP).map_err(TracerError::Ptrace)?;

    Ok(())
}

fn resume(pid: Pid, state: &TraceState, signal: Option<Signal>) -> Result<()> {
    if state.stepping {
        ptrace::step(pid, signal).map_err(TracerError::Ptrace)?;
    } else {
        ptrace::cont(pid, signal).map_err(TracerError::Ptrace)?;
    }
    Ok(())
}

pub fn exit_reason(outcome: TraceOutcome) -> String {
    let sig = match outcome {
        TraceOutcome::Exited(code) => {
            return format!("Process exited cleanly with exit code {}", code);
        }
        TraceOutcome::Signaled(sig) => sig,
    };

    match sig {
        Signal::SIGALRM => "Execution timed out (SIGALRM)".to_string(),
        Signal::SIGABRT => "Execution crashed with an abort (SIGABRT)".to_string(),
        Signal::SIGBUS => "Execution crashed with a bus error (SIGBUS)".to_string(),
        Signal::SIGFPE => "Execution crashed with a floating point error (SIGFPE)".to_string(),
        Signal::SIGILL => "Execution crashed with an illegal instruction (SIGILL)".to_string(),
        Signal::SIGKILL => "Execution was killed (SIGKILL)".to_string(),
        Signal::SIGSEGV => "Execution crashed with a segmentation fault (SIGSEGV)".to_string(),
        Signal::SIGTERM => "Execution was terminated (SIGTERM)".to_string(),
        Signal::SIGTRAP => "Unhandled breakpoint (SIGTRAP)".to_string(),
        other => format!("Execution stopped by unexpected signal {}", other),
    }
}
