use std::io::{self, Write};

use colored::Colorize;

use super::OutputSink;
use crate::error::{OutputError, Result};
use crate::event::*;

/// Colored terminal output sink (writes to stderr).
pub struct TerminalSink {
    verbosity: u8,
}

impl TerminalSink {
    pub fn new(verbosity: u8, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { verbosity }
    }

    fn format_registers(registers: &RegisterSnapshot) -> String {
        registers
            .iter()
            .filter(|(_, v)| **v != 0)
            .map(|(k, v)| format!("{k}={v:#x}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn format_trap(&self, event: &TrapEvent) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let label = match event.phase {
            TrapPhase::Pre => "TRAP".cyan().bold().to_string(),
            TrapPhase::Post => "TRAP".green().bold().to_string(),
            TrapPhase::Payload => "TRAP".yellow().bold().to_string(),
        };
        let mut line = format!("{ts} {label} {:<7} pc={:#x}", event.phase.to_string(), event.pc);
        if let Some(ptr) = event.code_pointer {
            line.push_str(&format!(" entry={ptr:#x}"));
        }
        if let Some(ret) = event.return_value {
            line.push_str(&format!(" result={ret} ({ret:#x})"));
        }
        if let Some(region) = &event.region {
            line.push_str(&format!(" [{} bytes: {}]", region.len, region.bytes).dimmed().to_string());
        }
        if self.verbosity > 1 {
            line.push_str(&format!("\n    {}", Self::format_registers(&event.registers)));
        }
        line
    }

    fn format_step(&self, event: &StepEvent) -> String {
        let location = match event.offset {
            Some(offset) => format!("+{offset:<4x}"),
            None => format!("{:#x}", event.pc),
        };
        let mut line = format!(
            "  {} {location} {}",
            format!("#{:<5}", event.index).dimmed(),
            event.bytes
        );
        let at_pc = event.analysis.values().find(|v| v.value == event.pc);
        if let Some(insn) = at_pc.and_then(|v| v.as_instruction.as_ref()) {
            line.push_str(&format!("  {}", insn.cyan()));
        }
        if self.verbosity > 2 {
            line.push_str(&format!("\n    {}", Self::format_registers(&event.registers)));
        }
        line
    }

    fn format_summary(&self, summary: &TraceSummary) -> String {
        let mut lines = Vec::new();
        lines.push(format!("\n{}", "=== Trace Summary ===".bold()));
        lines.push(format!("Arch:          {}", summary.arch));
        lines.push(format!("Duration:      {}ms", summary.duration_ms));
        if let Some(base) = summary.base_address {
            lines.push(format!("Base address:  {base:#x}"));
        }
        lines.push(format!("Traps:         {}", summary.trap_count));
        let truncated = if summary.steps_truncated { " (truncated)" } else { "" };
        lines.push(format!("Steps:         {}{truncated}", summary.step_count));
        if let Some(code) = summary.exit_code {
            lines.push(format!("Exit code:     {code}"));
        }
        if let Some(signal) = &summary.signal {
            lines.push(format!("Signal:        {}", signal.red()));
        }
        let reason = if summary.timed_out {
            summary.reason.red().bold().to_string()
        } else {
            summary.reason.clone()
        };
        lines.push(format!("Reason:        {reason}"));
        lines.join("\n")
    }
}

impl OutputSink for TerminalSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        let line = match event {
            TraceEvent::Trap(e) => self.format_trap(e),
            TraceEvent::Step(e) => {
                if self.verbosity < 2 {
                    return Ok(());
                }
                self.format_step(e)
            }
            TraceEvent::Signal(e) => format!(
                "{} {} {} at {:#x}",
                e.timestamp.format("%H:%M:%S%.3f"),
                "SIG ".yellow().bold(),
                e.signal,
                e.pc
            ),
            TraceEvent::Exit(ExitEvent::Exited { code, .. }) => {
                let status = format!("exit {code}");
                if *code == 0 {
                    status.green().to_string()
                } else {
                    status.red().to_string()
                }
            }
            TraceEvent::Exit(ExitEvent::Signaled { signal, reason, .. }) => {
                format!("{} ({reason})", signal.red().bold())
            }
            TraceEvent::Output(e) => {
                if e.stdout.is_empty() && e.stderr.is_empty() {
                    return Ok(());
                }
                let mut lines = Vec::new();
                for (label, text) in [("stdout", &e.stdout), ("stderr", &e.stderr)] {
                    if !text.is_empty() {
                        lines.push(format!("{} {}", label.dimmed(), text.escape_debug()));
                    }
                }
                lines.join("\n")
            }
            TraceEvent::Summary(s) => self.format_summary(s),
        };
        writeln!(io::stderr(), "{line}").map_err(OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        io::stderr().flush().map_err(OutputError::Io)?;
        Ok(())
    }
}
