use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Allocation failure: {0}")]
    Allocation(#[from] AllocationFailure),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracer error: {0}")]
    Tracer(#[from] TracerError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid hex character {character:?} at offset {index}")]
    InvalidInput { character: char, index: usize },

    #[error("odd-length hex input ({length} digits); pass --truncate-odd to drop the final nibble")]
    OddLength { length: usize },

    #[error("no code to execute")]
    Empty,
}

#[derive(Error, Debug)]
#[error("could not map {size} bytes of executable memory (hint {hint}): {source}")]
pub struct AllocationFailure {
    pub size: usize,
    pub hint: String,
    #[source]
    pub source: nix::Error,
}

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("timeout must be a positive number of seconds")]
    InvalidDuration,

    #[error("watchdog already armed in this process")]
    AlreadyArmed,

    #[error("failed to reset SIGALRM disposition: {0}")]
    Signal(#[source] nix::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("Ptrace error: {0}")]
    Ptrace(#[source] nix::Error),

    #[error("Wait failed: {0}")]
    Wait(#[source] nix::Error),

    #[error("Output capture failed: {0}")]
    Capture(#[source] nix::Error),

    #[error("Unexpected stop before tracing started: {0}")]
    UnexpectedStop(String),

    #[error("Memory read failed at {addr:#x}: {source}")]
    MemoryRead {
        addr: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
