use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "trapline")]
#[command(
    about = "Run hex-encoded machine code between two debugger traps, under a watchdog"
)]
#[command(version)]
pub struct Cli {
    /// Hex-encoded machine code to execute
    #[arg(value_name = "HEX")]
    pub code: String,

    /// Kill the process after N seconds [default: 10]
    #[arg(short, long, value_name = "SECONDS", value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Preferred address for the code mapping (hint only) [default: 0x13370000]
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    pub load_address: Option<u64>,

    /// Let the kernel choose the mapping address
    #[arg(long)]
    pub no_fixed_address: bool,

    /// Drop a trailing half byte instead of rejecting odd-length input
    #[arg(long)]
    pub truncate_odd: bool,

    /// TOML config file (default: ~/.trapline/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run under the built-in tracer and emit JSONL events
    #[arg(long)]
    pub trace: bool,

    /// Single-step the payload between the traps (implies --trace)
    #[arg(long)]
    pub step: bool,

    /// Maximum number of steps to record
    #[arg(long, value_name = "N")]
    pub max_steps: Option<usize>,

    /// Report steps where pc & --visible-mask equals this address
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    pub visible_address: Option<u64>,

    #[arg(long, value_name = "MASK", value_parser = parse_address)]
    pub visible_mask: Option<u64>,

    /// Skip steps where pc & --hidden-mask equals this address
    #[arg(long, value_name = "ADDR", value_parser = parse_address)]
    pub hidden_address: Option<u64>,

    #[arg(long, value_name = "MASK", value_parser = parse_address)]
    pub hidden_mask: Option<u64>,

    /// JSONL output file for --trace (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print a human-readable trace on stderr
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Disable colored terminal output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    pub fn tracing(&self) -> bool {
        self.trace || self.step
    }
}

/// Accepts `0x`-prefixed hex or plain decimal.
pub fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(&digits.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(parse_address("0x13370000"), Ok(0x1337_0000));
        assert_eq!(parse_address("0X1337_0000"), Ok(0x1337_0000));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("0xzz").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_single_positional_required() {
        assert!(Cli::try_parse_from(["trapline"]).is_err());
        assert!(Cli::try_parse_from(["trapline", "c3", "c3"]).is_err());
        let cli = Cli::try_parse_from(["trapline", "c3"]).unwrap();
        assert_eq!(cli.code, "c3");
        assert!(!cli.tracing());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Cli::try_parse_from(["trapline", "--timeout", "0", "c3"]).is_err());
    }

    #[test]
    fn test_visibility_flags_parse() {
        let cli = Cli::try_parse_from([
            "trapline",
            "--hidden-address",
            "0x7f0000000000",
            "--hidden-mask",
            "0xff0000000000",
            "c3",
        ])
        .unwrap();
        assert_eq!(cli.hidden_address, Some(0x7f00_0000_0000));
        assert_eq!(cli.hidden_mask, Some(0xff00_0000_0000));
        assert_eq!(cli.visible_address, None);
    }

    #[test]
    fn test_step_implies_trace() {
        let cli = Cli::try_parse_from(["trapline", "--step", "c3"]).unwrap();
        assert!(cli.tracing());
    }
}
