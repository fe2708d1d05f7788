//! Resume tokens.
//!
//! When a pass is interrupted or fails, the run can be continued later
//! from a [`ResumeToken`]: the key, the stage, the position of the first
//! unfinished chunk, and a snapshot of every parameter that affects what
//! is written or read.  Tokens are replayable two ways:
//!
//! - as a command line (`to_args` / `command_line`), which the CLI prints
//!   when it stops early
//! - as a JSON state file (`save` / `load`)
//!
//! Resuming at `position` redoes at most the one chunk that was in flight
//! when the run stopped.  Rewriting or retesting it is harmless since the
//! keystream at a given offset never changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{FuzzRate, RunConfig, RunConfigBuilder, DEFAULT_CHUNK_SIZE};
use crate::engine::Stage;
use crate::error::{ConfigError, TokenError};
use crate::key::Key;

/// Every run parameter that shapes the byte stream or the pass sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub begin: u64,
    pub end: u64,
    pub chunk_size: u64,
    #[serde(default)]
    pub fuzz_ppm: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake_rollover: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fake_zeroed: Option<u64>,
    #[serde(default)]
    pub skip_test: bool,
    #[serde(default)]
    pub buffered: bool,
    #[serde(default)]
    pub exhaustive_diff: bool,
}

impl ConfigSnapshot {
    pub fn of(config: &RunConfig) -> Self {
        Self {
            begin: config.region.begin,
            end: config.region.end,
            chunk_size: config.chunk_size,
            fuzz_ppm: config.fuzz.ppm(),
            fake_rollover: config.fake_rollover,
            fake_zeroed: config.fake_zeroed,
            skip_test: config.skip_test,
            buffered: !config.direct_io,
            exhaustive_diff: config.exhaustive_diff,
        }
    }

    /// A builder reproducing the snapshotted configuration under `key`.
    pub fn builder(&self, key: Key) -> Result<RunConfigBuilder, ConfigError> {
        Ok(RunConfig::builder(key)
            .begin(self.begin)
            .end(Some(self.end))
            .chunk_size(self.chunk_size)
            .fuzz(FuzzRate::from_ppm(self.fuzz_ppm)?)
            .fake_rollover(self.fake_rollover)
            .fake_zeroed(self.fake_zeroed)
            .skip_test(self.skip_test)
            .direct_io(!self.buffered)
            .exhaustive_diff(self.exhaustive_diff))
    }
}

/// Where and how to pick a run back up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub key: Key,
    pub stage: Stage,
    /// Stream position of the first chunk that did not complete.
    pub position: u64,
    pub config: ConfigSnapshot,
}

impl ResumeToken {
    pub fn capture(config: &RunConfig, stage: Stage, position: u64) -> Self {
        Self {
            key: config.key.clone(),
            stage,
            position,
            config: ConfigSnapshot::of(config),
        }
    }

    /// Rebuild the configuration this token was captured from.
    ///
    /// `device_size` is checked against the region again, so a token
    /// replayed against a smaller target is rejected.
    pub fn to_config(&self, device_size: Option<u64>) -> Result<RunConfig, ConfigError> {
        let config = self
            .config
            .builder(self.key.clone())?
            .device_size(device_size)
            .build()?;
        config.validate_resume("resume position", self.position)?;
        Ok(config)
    }

    /// Command-line arguments that continue the run, `program` first and
    /// `target` last.
    pub fn to_args(&self, program: &str, target: &str) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![
            program.to_string(),
            format!("--key={}", self.key.to_base64()),
            format!("--resume-{}={}", self.stage, self.position),
        ];
        if c.begin != 0 {
            args.push(format!("--begin={}", c.begin));
        }
        args.push(format!("--end={}", c.end));
        if c.chunk_size != DEFAULT_CHUNK_SIZE {
            args.push(format!("--chunk-size={}", c.chunk_size));
        }
        if c.fuzz_ppm != 0 {
            // from_ppm only fails above 100%, which `of` never produces.
            if let Ok(rate) = FuzzRate::from_ppm(c.fuzz_ppm) {
                args.push(format!("--fuzz={}", rate.to_percent_string()));
            }
        }
        if let Some(window) = c.fake_rollover {
            args.push(format!("--fake-rollover={window}"));
        }
        if let Some(threshold) = c.fake_zeroed {
            args.push(format!("--fake-zeroed={threshold}"));
        }
        for (set, flag) in [
            (c.skip_test, "--skip-test"),
            (c.buffered, "--buffered"),
            (c.exhaustive_diff, "--exhaustive-diff"),
        ] {
            if set {
                args.push(flag.to_string());
            }
        }
        args.push(target.to_string());
        args
    }

    /// [`to_args`](Self::to_args) joined into a shell command line.
    pub fn command_line(&self, program: &str, target: &str) -> String {
        self.to_args(program, target)
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Save as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TokenError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TokenError> {
        let json = fs::read_to_string(path)?;
        let token = serde_json::from_str(&json)?;
        Ok(token)
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig::builder(Key::from_bytes(&[0u8; 16]).unwrap())
            .begin(4096)
            .end(Some(1 << 20))
            .chunk_size(64 * 1024)
            .fuzz(FuzzRate::from_percent(0.25).unwrap())
            .fake_zeroed(Some(512 * 1024))
            .skip_test(true)
            .build()
            .unwrap()
    }

    #[test]
    fn args_carry_every_parameter() {
        let token = ResumeToken::capture(&config(), Stage::Write, 196_608);
        let args = token.to_args("honestbt", "/dev/sdz");
        assert_eq!(
            args,
            [
                "honestbt",
                "--key=AAAAAAAAAAAAAAAAAAAAAA==",
                "--resume-write=196608",
                "--begin=4096",
                "--end=1048576",
                "--chunk-size=65536",
                "--fuzz=0.25",
                "--fake-zeroed=524288",
                "--skip-test",
                "/dev/sdz",
            ]
        );
    }

    #[test]
    fn defaults_are_left_out() {
        let cfg = RunConfig::builder(Key::from_bytes(&[0u8; 16]).unwrap())
            .device_size(Some(1 << 30))
            .build()
            .unwrap();
        let token = ResumeToken::capture(&cfg, Stage::Test, 0);
        assert_eq!(
            token.to_args("honestbt", "disk.img"),
            [
                "honestbt",
                "--key=AAAAAAAAAAAAAAAAAAAAAA==",
                "--resume-test=0",
                "--end=1073741824",
                "disk.img",
            ]
        );
    }

    #[test]
    fn command_line_quotes_awkward_paths() {
        let token = ResumeToken::capture(&config(), Stage::Test, 4096);
        let line = token.command_line("honestbt", "/mnt/my disk's image");
        assert!(line.starts_with("honestbt --key=AAAAAAAAAAAAAAAAAAAAAA== --resume-test=4096 "));
        assert!(line.ends_with(r"'/mnt/my disk'\''s image'"), "{line}");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn snapshot_rebuilds_the_same_config() {
        let cfg = config();
        let token = ResumeToken::capture(&cfg, Stage::Write, 65536 + 4096);
        assert_eq!(token.to_config(None).unwrap(), cfg);
    }

    #[test]
    fn to_config_rejects_bad_positions_and_small_targets() {
        let mut token = ResumeToken::capture(&config(), Stage::Write, 4096);
        assert!(matches!(
            token.to_config(Some(4096)),
            Err(ConfigError::RegionBeyondDevice { .. })
        ));
        token.position = 4100;
        assert!(matches!(
            token.to_config(None),
            Err(ConfigError::Unaligned { offset: 4100, .. })
        ));
    }

    #[test]
    fn state_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("honestbt.state");
        let token = ResumeToken::capture(&config(), Stage::Test, 131_072);

        token.save(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"stage\": \"test\""));
        assert!(json.contains("\"key\": \"AAAAAAAAAAAAAAAAAAAAAA==\""));

        assert_eq!(ResumeToken::load(&path).unwrap(), token);
    }

    #[test]
    fn load_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.state");
        std::fs::write(
            &path,
            r#"{"key":"AAAA","stage":"write","position":0,
               "config":{"begin":0,"end":4096,"chunk_size":1024}}"#,
        )
        .unwrap();
        assert!(matches!(ResumeToken::load(&path), Err(TokenError::Json(_))));
        assert!(matches!(
            ResumeToken::load(dir.path().join("missing")),
            Err(TokenError::Io(_))
        ));
    }
}
