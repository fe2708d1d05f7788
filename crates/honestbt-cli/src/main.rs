//! honestbt: destructive tester which detects dishonest block devices.
//!
//! Fills the target with an AES-CTR keystream, then reads it back and
//! reports every byte that does not match.  EVERYTHING ON THE TARGET IS
//! DESTROYED.
//!
//! # Usage
//!
//! ```bash
//! # Full write + test of a device
//! honestbt /dev/sdX
//!
//! # Test only the first 4 GiB, in 4 MiB chunks
//! honestbt --end 4G --chunk-size 4M /dev/sdX
//!
//! # Prove the test pass catches corruption
//! honestbt --fuzz 0.01 disk.img
//!
//! # Resume after Ctrl-C (the exact command is printed on exit)
//! honestbt --key <KEY> --resume-write 123731968 --end 8589934592 /dev/sdX
//! ```
//!
//! # Exit status
//!
//! - `0` the run finished clean, or was cancelled (a resume command is
//!   printed)
//! - `1` the test pass found mismatches
//! - `2` invalid arguments or resume state
//! - `3` I/O failure (a resume command is printed)

mod args;
mod report;

use clap::Parser;
use honestbt_core::{
    CancelToken, FileChannel, IoChannel, LogSink, ResumeToken, Session, SessionError, SessionOutcome,
};
use log::{error, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::args::Args;
use crate::report::{format_banner, format_report};

const EXIT_OK: i32 = 0;
const EXIT_MISMATCH: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_IO: i32 = 3;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    std::process::exit(run(&args));
}

fn run(args: &Args) -> i32 {
    let target = args.target.display().to_string();

    let state = match args.load_state() {
        Ok(state) => state,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };

    let mut channel = match FileChannel::open(&args.target, args.open_mode(state.as_ref())) {
        Ok(channel) => channel,
        Err(e) => {
            error!("cannot open {target}: {e}");
            return EXIT_IO;
        }
    };
    let device_size = match channel.size() {
        Ok(size) => size,
        Err(e) => {
            error!("cannot determine the size of {target}: {e}");
            return EXIT_IO;
        }
    };

    let mut rng = ChaCha20Rng::from_entropy();
    let (config, plan) = match args.into_run(state, Some(device_size), &mut rng) {
        Ok(run) => run,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };
    if config.direct_io && !channel.is_direct() {
        info!("continuing with buffered I/O; reads may be served from the page cache");
    }

    eprintln!("{}", format_banner(&config, &target, channel.is_direct()));

    let cancel = CancelToken::new();
    if let Err(e) = cancel.register_signals() {
        warn!("cannot install signal handlers, Ctrl-C will not stop cleanly: {e}");
    }

    let session = Session::new(&config)
        .with_cancel(cancel)
        .with_progress(!args.no_progress);
    let mut sink = LogSink;

    match session.run(&plan, &mut channel, &mut rng, &mut sink) {
        Ok(SessionOutcome::Completed(report)) => {
            println!("{}", format_report(&report));
            if report.mismatched_bytes() > 0 {
                EXIT_MISMATCH
            } else {
                EXIT_OK
            }
        }
        Ok(SessionOutcome::Cancelled { token, report }) => {
            println!("{}", format_report(&report));
            warn!("cancelled during the {} pass at offset {}", token.stage, token.position);
            emit_resume(args, &target, &token);
            EXIT_OK
        }
        Err(SessionError::Config(e)) => {
            error!("{e}");
            EXIT_CONFIG
        }
        Err(SessionError::Pass { token, source }) => {
            error!("{} pass stopped: {source}", token.stage);
            if let Some(cause) = std::error::Error::source(&source) {
                error!("  caused by: {cause}");
            }
            emit_resume(args, &target, &token);
            EXIT_IO
        }
    }
}

/// Print the resume command and, if requested, save the state file.
fn emit_resume(args: &Args, target: &str, token: &ResumeToken) {
    let program = std::env::args().next().unwrap_or_else(|| "honestbt".to_string());
    eprintln!();
    eprintln!("To resume, run:");
    eprintln!("  {}", token.command_line(&program, target));

    if let Some(path) = &args.state_file {
        match token.save(path) {
            Ok(()) => eprintln!("Saved resume state to: {}", path.display()),
            Err(e) => warn!("failed to save resume state to {}: {e}", path.display()),
        }
    }
}
