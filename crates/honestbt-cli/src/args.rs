//! Command-line arguments and their translation into a run.

use std::path::PathBuf;

use clap::Parser;
use honestbt_core::config::DEFAULT_CHUNK_SIZE;
use honestbt_core::{
    ConfigError, FuzzRate, Key, KeySize, OpenMode, Plan, ResumeToken, RunConfig, TokenError,
};
use rand::RngCore;
use thiserror::Error;

/// Errors turning arguments into a validated run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("resume state: {0}")]
    Token(#[from] TokenError),
}

#[derive(Parser, Debug)]
#[command(name = "honestbt")]
#[command(about = "Destructive tester which detects dishonest block devices")]
#[command(version)]
pub struct Args {
    /// Block device or file to test. Everything on it is overwritten.
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// AES key as base64 (16, 24 or 32 bytes). Generated when omitted.
    #[arg(long)]
    pub key: Option<String>,

    /// Size of a generated key: 128, 192 or 256.
    #[arg(long, default_value = "256")]
    pub key_bits: u32,

    /// First byte of the region to test (multiple of 16).
    #[arg(long, default_value = "0", value_parser = parse_size)]
    pub begin: u64,

    /// End of the region to test (exclusive). Defaults to the target size.
    #[arg(long, value_parser = parse_size)]
    pub end: Option<u64>,

    /// I/O chunk size (multiple of 16).
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_size)]
    pub chunk_size: u64,

    /// Corrupt this percentage of written bytes, to prove the test pass
    /// catches them.
    #[arg(long, value_name = "PERCENT", default_value = "0")]
    pub fuzz: f64,

    /// Simulate a device whose physical capacity is this many bytes.
    /// Must be a multiple of --chunk-size.
    #[arg(long, value_parser = parse_size)]
    pub fake_rollover: Option<u64>,

    /// Simulate a device that stores nothing past this many bytes.
    #[arg(long, value_parser = parse_size)]
    pub fake_zeroed: Option<u64>,

    /// Write only; do not read back.
    #[arg(long)]
    pub skip_test: bool,

    /// Continue an interrupted write pass at this offset.
    #[arg(long, value_parser = parse_size, requires = "key", conflicts_with = "resume_test")]
    pub resume_write: Option<u64>,

    /// Skip writing and continue the test pass at this offset.
    #[arg(long, value_parser = parse_size, requires = "key")]
    pub resume_test: Option<u64>,

    /// Use the page cache instead of direct I/O.
    #[arg(long)]
    pub buffered: bool,

    /// Report every mismatched byte, even in chunks that are almost
    /// entirely wrong.
    #[arg(long)]
    pub exhaustive_diff: bool,

    /// Do not log periodic progress lines.
    #[arg(long)]
    pub no_progress: bool,

    /// Write the resume token here as JSON if the run stops early.
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Resume from a state file written by --state-file.
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with_all = ["key", "resume_write", "resume_test"]
    )]
    pub resume_state: Option<PathBuf>,
}

impl Args {
    /// The token named by `--resume-state`, if any.
    pub fn load_state(&self) -> Result<Option<ResumeToken>, TokenError> {
        self.resume_state
            .as_ref()
            .map(ResumeToken::load)
            .transpose()
    }

    pub fn open_mode(&self, state: Option<&ResumeToken>) -> OpenMode {
        let buffered = self.buffered || state.is_some_and(|t| t.config.buffered);
        if buffered {
            OpenMode::Buffered
        } else {
            OpenMode::Direct
        }
    }

    /// Build the run configuration and pass plan.
    ///
    /// A loaded state token wins over every configuration flag.  `rng`
    /// is only used to generate a key when none was given.
    pub fn into_run<R: RngCore + ?Sized>(
        &self,
        state: Option<ResumeToken>,
        device_size: Option<u64>,
        rng: &mut R,
    ) -> Result<(RunConfig, Plan), SetupError> {
        if let Some(token) = state {
            let config = token.to_config(device_size)?;
            let plan = Plan::from_token(&config, &token);
            return Ok((config, plan));
        }

        let key = match &self.key {
            Some(encoded) => Key::from_base64(encoded)?,
            None => Key::generate(KeySize::from_bits(self.key_bits)?, rng),
        };
        let config = RunConfig::builder(key)
            .begin(self.begin)
            .end(self.end)
            .device_size(device_size)
            .chunk_size(self.chunk_size)
            .fuzz(FuzzRate::from_percent(self.fuzz)?)
            .fake_rollover(self.fake_rollover)
            .fake_zeroed(self.fake_zeroed)
            .skip_test(self.skip_test)
            .direct_io(!self.buffered)
            .exhaustive_diff(self.exhaustive_diff)
            .build()?;

        let plan = match (self.resume_write, self.resume_test) {
            (Some(offset), _) => Plan::resume_write(&config, offset),
            (None, Some(offset)) => Plan::resume_test(offset),
            (None, None) => Plan::fresh(&config),
        };
        plan.validate(&config)?;
        Ok((config, plan))
    }
}

/// Parse a byte count with an optional binary suffix: `4096`, `64K`,
/// `1MiB`, `2G`, `1TB`.  All suffixes are powers of 1024.
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let text = s.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::Size(s.to_string()))?;

    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        _ => return Err(ConfigError::Size(s.to_string())),
    };
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| ConfigError::Size(s.to_string()))
}
