//! Session backend load driver.
//!
//! Runs the authenticate + validate cycle against one backend and reports
//! the elapsed time and resident memory.
//!
//! # Usage
//!
//! ```bash
//! session-bench --backend memory --sessions 2000000 --views 4 --threads 4
//! RUST_LOG=session_tokens=debug session-bench --backend file --durable --json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Duration;
use clap::{Parser, ValueEnum};
use session_tokens::bench::{LoadConfig, LoadReport, run_load};
use session_tokens::{
    FileSessionStore, MemorySessionStore, SessionConfig, SessionService, SignedTokenService,
};

/// Which backend to drive.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Backend {
    /// Stateless HMAC-signed tokens.
    Signed,
    /// Fixed-size slots in a temporary file.
    File,
    /// Concurrent in-memory map.
    #[default]
    Memory,
}

/// Benchmark session token backends.
#[derive(Parser, Debug)]
#[command(name = "session-bench")]
#[command(version, about = "Time authenticate/validate cycles against a session backend")]
struct Cli {
    /// Backend to benchmark.
    #[arg(short, long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Number of simulated users.
    #[arg(short, long, default_value_t = 100_000)]
    sessions: usize,

    /// Token validations per user.
    #[arg(short, long, default_value_t = 4)]
    views: usize,

    /// Worker threads sharing the backend.
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    /// Session lifetime in minutes.
    #[arg(long, default_value_t = 30)]
    lifetime_minutes: i64,

    /// Directory for the file backend's backing file.
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Sync every slot write to disk (file backend).
    #[arg(long, default_value = "false")]
    durable: bool,

    /// Print the report as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl Cli {
    fn session_config(&self) -> Result<SessionConfig, String> {
        let lifetime = Duration::try_minutes(self.lifetime_minutes).ok_or_else(|| {
            format!(
                "--lifetime-minutes {} is out of range",
                self.lifetime_minutes
            )
        })?;
        let mut config = SessionConfig::default()
            .with_session_lifetime(lifetime)
            .with_durable_writes(self.durable);
        if let Some(dir) = &self.directory {
            config = config.with_directory(dir);
        }
        Ok(config)
    }

    fn load_config(&self) -> LoadConfig {
        LoadConfig {
            sessions: self.sessions,
            views: self.views,
            threads: self.threads,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let session_config = match cli.session_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let load_config = cli.load_config();

    let outcome = match cli.backend {
        Backend::Signed => SignedTokenService::with_config(session_config)
            .map_err(|e| e.to_string())
            .and_then(|service| drive(&service, &load_config)),
        Backend::Memory => MemorySessionStore::with_config(session_config)
            .map_err(|e| e.to_string())
            .and_then(|store| drive(&store, &load_config)),
        Backend::File => FileSessionStore::with_config(session_config)
            .map_err(|e| e.to_string())
            .and_then(|store| {
                let report = drive(&store, &load_config);
                let closed = store.close().map_err(|e| e.to_string());
                let report = report?;
                closed.map(|()| report)
            }),
    };

    match outcome {
        Ok(report) => {
            print_report(&report, cli.json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn drive(service: &dyn SessionService, config: &LoadConfig) -> Result<LoadReport, String> {
    println!("Beginning test: {}", service.backend_name());
    run_load(service, config).map_err(|e| e.to_string())
}

fn print_report(report: &LoadReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(body) => println!("{body}"),
            Err(e) => eprintln!("Error: failed to serialize report: {e}"),
        }
    } else {
        println!("{report}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lifetime_is_thirty_minutes() {
        let cli = Cli::parse_from(["session-bench"]);
        let config = cli.session_config().unwrap();
        assert_eq!(config.session_lifetime, Duration::minutes(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_lifetime_is_cli_error() {
        let cli = Cli::parse_from(["session-bench", "--lifetime-minutes", "9223372036854775807"]);
        assert!(cli.session_config().is_err());
    }

    #[test]
    fn test_oversized_lifetime_fails_validation() {
        let cli = Cli::parse_from(["session-bench", "--lifetime-minutes", "100000000000"]);
        let config = cli.session_config().unwrap();
        assert!(MemorySessionStore::with_config(config).is_err());
    }
}
