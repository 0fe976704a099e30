//! End-to-end tests running the same scenarios against every backend.
//!
//! Run with: `cargo test --test session_backends`

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::collections::HashSet;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use session_tokens::{
    AuthError, Clock, FileSessionStore, ManualClock, MemorySessionStore, SecretString,
    SessionConfig, SessionService, SignedTokenService,
};

fn password() -> SecretString {
    SecretString::new("pw1")
}

fn backends_with_clock(clock: &ManualClock) -> Vec<Box<dyn SessionService>> {
    vec![
        Box::new(SignedTokenService::new().with_clock(clock.clone())),
        Box::new(FileSessionStore::new().unwrap().with_clock(clock.clone())),
        Box::new(MemorySessionStore::new().with_clock(clock.clone())),
    ]
}

fn backends() -> Vec<Box<dyn SessionService>> {
    backends_with_clock(&ManualClock::default())
}

#[test]
fn first_session_validates_to_user_one() {
    for backend in backends() {
        let token = backend.authenticate("alice", &password()).unwrap();
        let user_id = backend.validate_token(token.expose_secret()).unwrap();
        assert_eq!(user_id.as_deref(), Some("1"), "{}", backend.backend_name());
    }
}

#[test]
fn validation_is_idempotent() {
    for backend in backends() {
        let token = backend.authenticate("alice", &password()).unwrap();
        backend.authenticate("bob", &password()).unwrap();

        for _ in 0..5 {
            let user_id = backend.validate_token(token.expose_secret()).unwrap();
            assert_eq!(user_id.as_deref(), Some("1"), "{}", backend.backend_name());
        }
    }
}

#[test]
fn garbage_tokens_are_invalid_not_errors() {
    for backend in backends() {
        backend.authenticate("alice", &password()).unwrap();
        for token in ["", "not-a-number", "*", "1*", "====", "\u{1F600}", "-"] {
            let outcome = backend.validate_token(token);
            assert_eq!(outcome, Ok(None), "{} accepted {token:?}", backend.backend_name());
        }
    }
}

#[test]
fn tokens_from_another_instance_are_rejected() {
    let issuer = SignedTokenService::new();
    let token = issuer.authenticate("alice", &password()).unwrap();
    assert!(
        SignedTokenService::new()
            .validate_token(token.expose_secret())
            .unwrap()
            .is_none()
    );

    let issuer = MemorySessionStore::new();
    let token = issuer.authenticate("alice", &password()).unwrap();
    assert!(
        MemorySessionStore::new()
            .validate_token(token.expose_secret())
            .unwrap()
            .is_none()
    );

    let issuer = FileSessionStore::new().unwrap();
    let token = issuer.authenticate("alice", &password()).unwrap();
    let other = FileSessionStore::new().unwrap();
    assert!(other.validate_token(token.expose_secret()).unwrap().is_none());
    issuer.close().unwrap();
    other.close().unwrap();
}

#[test]
fn tokens_expire_after_thirty_minutes() {
    let clock = ManualClock::default();
    let backends = backends_with_clock(&clock);
    let tokens: Vec<SecretString> = backends
        .iter()
        .map(|backend| backend.authenticate("alice", &password()).unwrap())
        .collect();

    let issued_at = clock.now();
    for elapsed in [
        Duration::zero(),
        Duration::minutes(1),
        Duration::minutes(15),
        Duration::minutes(29) + Duration::seconds(59),
    ] {
        clock.set(issued_at + elapsed);
        for (backend, token) in backends.iter().zip(&tokens) {
            assert!(
                backend.validate_token(token.expose_secret()).unwrap().is_some(),
                "{} expired early",
                backend.backend_name()
            );
        }
    }

    clock.set(issued_at + Duration::minutes(30));
    for (backend, token) in backends.iter().zip(&tokens) {
        assert!(
            backend.validate_token(token.expose_secret()).unwrap().is_none(),
            "{} still valid at lifetime",
            backend.backend_name()
        );
    }

    clock.advance(Duration::days(365));
    for (backend, token) in backends.iter().zip(&tokens) {
        assert!(backend.validate_token(token.expose_secret()).unwrap().is_none());
    }
}

#[test]
fn expiry_past_the_calendar_is_an_error_not_a_panic() {
    let clock = ManualClock::new(DateTime::<Utc>::MAX_UTC - Duration::minutes(1));
    for backend in backends_with_clock(&clock) {
        let outcome = backend.authenticate("alice", &password());
        assert!(
            matches!(outcome, Err(AuthError::ConfigurationError(_))),
            "{}",
            backend.backend_name()
        );
    }
}

#[test]
fn oversized_lifetime_is_rejected_at_construction() {
    let config = SessionConfig::default().with_session_lifetime(Duration::days(365 * 300_000));

    assert!(SignedTokenService::with_config(config.clone()).is_err());
    assert!(FileSessionStore::with_config(config.clone()).is_err());
    assert!(MemorySessionStore::with_config(config).is_err());
}

#[test]
fn concurrent_sessions_get_distinct_ids() {
    for backend in backends() {
        let backend = backend.as_ref();
        let ids: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        (0..100)
                            .map(|_| {
                                let token = backend.authenticate("user", &password()).unwrap();
                                backend
                                    .validate_token(token.expose_secret())
                                    .unwrap()
                                    .unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 800, "{}", backend.backend_name());

        let expected: HashSet<String> = (1..=800).map(|id: i64| id.to_string()).collect();
        assert_eq!(
            ids.into_iter().collect::<HashSet<_>>(),
            expected,
            "{} skipped an id",
            backend.backend_name()
        );
    }
}

#[test]
fn file_store_scenario() {
    let store = FileSessionStore::new().unwrap();
    let token = store.authenticate("alice", &password()).unwrap();
    let (id, key) = token.expose_secret().split_once('*').unwrap();
    assert_eq!(id, "1");
    let key: i64 = key.parse().unwrap();

    assert_eq!(
        store.validate_token(&format!("1*{key}")).unwrap().as_deref(),
        Some("1")
    );
    assert!(
        store
            .validate_token(&format!("1*{}", key.wrapping_add(1)))
            .unwrap()
            .is_none()
    );
    assert!(store.validate_token("999*0").unwrap().is_none());

    let path = store.path().to_path_buf();
    store.close().unwrap();
    assert!(!path.exists());
}
