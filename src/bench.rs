//! Load driver for comparing session backends.
//!
//! Spawns a fixed number of worker threads against one shared backend. Each
//! simulated user authenticates once and then validates its token `views`
//! times. The run fails on the first rejected token.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::{AuthError, SecretString, SessionService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    /// Total simulated users, split across threads.
    pub sessions: usize,
    /// Validations per user after authenticating.
    pub views: usize,
    pub threads: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            sessions: 2_000_000,
            views: 4,
            threads: 1,
        }
    }
}

impl LoadConfig {
    /// Users assigned to worker `worker`; the remainder goes to the first workers.
    fn sessions_for(&self, worker: usize) -> usize {
        let base = self.sessions / self.threads;
        let extra = usize::from(worker < self.sessions % self.threads);
        base + extra
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub backend: &'static str,
    pub sessions: usize,
    pub views: usize,
    pub threads: usize,
    pub elapsed: Duration,
    /// Resident set size of this process after the run, when available.
    pub resident_memory_bytes: Option<u64>,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?} for {} sessions ({} views, {} threads)",
            self.backend, self.elapsed, self.sessions, self.views, self.threads
        )?;
        if let Some(bytes) = self.resident_memory_bytes {
            // precision loss is irrelevant for display
            #[allow(clippy::cast_precision_loss)]
            let megabytes = bytes as f64 / 1_000_000.0;
            write!(f, ", {megabytes:.2}MB resident")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    InvalidConfig(String),
    AuthenticationFailed { username: String },
    ValidationFailed { username: String },
    Backend(AuthError),
}

impl std::error::Error for LoadError {}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::InvalidConfig(msg) => write!(f, "Invalid load configuration: {msg}"),
            LoadError::AuthenticationFailed { username } => {
                write!(f, "Failed authentication for {username}")
            }
            LoadError::ValidationFailed { username } => {
                write!(f, "Failed authorization for {username}")
            }
            LoadError::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl From<AuthError> for LoadError {
    fn from(err: AuthError) -> Self {
        LoadError::Backend(err)
    }
}

/// Runs the authenticate/validate cycle described by `config` against `service`.
///
/// # Errors
///
/// Returns the first failure any worker hit. Other workers stop at their next
/// user once a failure is recorded.
pub fn run_load<S>(service: &S, config: &LoadConfig) -> Result<LoadReport, LoadError>
where
    S: SessionService + ?Sized,
{
    if config.threads == 0 {
        return Err(LoadError::InvalidConfig(
            "threads must be at least 1".to_owned(),
        ));
    }

    log::info!(
        target: "session_tokens",
        "msg=\"load test started\" backend={} sessions={} views={} threads={}",
        service.backend_name(),
        config.sessions,
        config.views,
        config.threads
    );

    let next_user = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let started = Instant::now();

    let outcome = thread::scope(|scope| {
        let workers: Vec<_> = (0..config.threads)
            .map(|worker| {
                let sessions = config.sessions_for(worker);
                let next_user = &next_user;
                let failed = &failed;
                scope.spawn(move || {
                    let result =
                        simulate_users(service, sessions, config.views, next_user, failed);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    result
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| {
                worker.join().unwrap_or_else(|_| {
                    Err(LoadError::Backend(AuthError::StorageError(
                        "worker thread panicked".to_owned(),
                    )))
                })
            })
            .collect::<Vec<_>>()
    });
    let elapsed = started.elapsed();

    if let Some(err) = outcome.into_iter().find_map(Result::err) {
        log::error!(target: "session_tokens", "msg=\"load test failed\" backend={} error=\"{err}\"", service.backend_name());
        return Err(err);
    }

    let report = LoadReport {
        backend: service.backend_name(),
        sessions: config.sessions,
        views: config.views,
        threads: config.threads,
        elapsed,
        resident_memory_bytes: resident_memory_bytes(),
    };
    log::info!(target: "session_tokens", "msg=\"load test finished\" {report}");
    Ok(report)
}

fn simulate_users<S>(
    service: &S,
    sessions: usize,
    views: usize,
    next_user: &AtomicUsize,
    failed: &AtomicBool,
) -> Result<(), LoadError>
where
    S: SessionService + ?Sized,
{
    let mut rng = rand::thread_rng();
    for _ in 0..sessions {
        if failed.load(Ordering::Relaxed) {
            return Ok(());
        }

        let username = format!("user{}", next_user.fetch_add(1, Ordering::Relaxed) + 1);
        let password = SecretString::new(format!("pw{}", rng.r#gen::<u32>()));

        let token = service.authenticate(&username, &password)?;
        if token.is_empty() {
            return Err(LoadError::AuthenticationFailed { username });
        }

        for _ in 0..views {
            if service.validate_token(token.expose_secret())?.is_none() {
                return Err(LoadError::ValidationFailed { username });
            }
        }
    }
    Ok(())
}

fn resident_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(sysinfo::Process::memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySessionStore;

    /// Issues tokens that never validate.
    struct RejectingService;

    impl SessionService for RejectingService {
        fn authenticate(
            &self,
            _username: &str,
            _password: &SecretString,
        ) -> Result<SecretString, AuthError> {
            Ok(SecretString::new("token"))
        }

        fn validate_token(&self, _token: &str) -> Result<Option<String>, AuthError> {
            Ok(None)
        }

        fn backend_name(&self) -> &'static str {
            "rejecting"
        }
    }

    #[test]
    fn test_sessions_split_across_threads() {
        let config = LoadConfig {
            sessions: 10,
            views: 1,
            threads: 3,
        };
        let split: Vec<usize> = (0..3).map(|w| config.sessions_for(w)).collect();
        assert_eq!(split, vec![4, 3, 3]);
    }

    #[test]
    fn test_run_load_counts_every_session() {
        let store = MemorySessionStore::new();
        let config = LoadConfig {
            sessions: 200,
            views: 3,
            threads: 4,
        };

        let report = run_load(&store, &config).unwrap();
        assert_eq!(report.backend, "memory");
        assert_eq!(report.sessions, 200);
        assert_eq!(store.len(), 200);
    }

    #[test]
    fn test_run_load_reports_validation_failure() {
        let config = LoadConfig {
            sessions: 5,
            views: 1,
            threads: 1,
        };
        let err = run_load(&RejectingService, &config).unwrap_err();
        assert_eq!(
            err,
            LoadError::ValidationFailed {
                username: "user1".to_owned()
            }
        );
    }

    #[test]
    fn test_run_load_rejects_zero_threads() {
        let config = LoadConfig {
            threads: 0,
            ..LoadConfig::default()
        };
        assert!(matches!(
            run_load(&MemorySessionStore::new(), &config),
            Err(LoadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_report_serializes() {
        let report = LoadReport {
            backend: "signed",
            sessions: 1,
            views: 4,
            threads: 1,
            elapsed: Duration::from_millis(5),
            resident_memory_bytes: Some(2_000_000),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["backend"], "signed");
        assert_eq!(json["resident_memory_bytes"], 2_000_000);
        assert!(report.to_string().contains("2.00MB resident"));
    }
}
