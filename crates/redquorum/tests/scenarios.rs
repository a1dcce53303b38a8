//! End-to-end scenarios exercised against an in-memory store double, the
//! way a real Redis cluster would behave for the operations this crate
//! actually sends it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use redquorum::{Error, ExecutionResult, Overrides, Redlock, Settings, Store, StoreError};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    ttl_known: bool,
}

/// A script-level reimplementation of the acquire/extend/release contract,
/// kept independent of the crate's own internal fake so these tests stand
/// on the public API alone.
struct ScriptedStore {
    keys: Mutex<HashMap<String, Entry>>,
    unreachable: bool,
}

impl ScriptedStore {
    fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            unreachable: false,
        }
    }

    fn unreachable() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            unreachable: true,
        }
    }

    fn seed_foreign(&self, key: &str, value: &str) {
        self.keys.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.as_bytes().to_vec(),
                expires_at: Instant::now() + Duration::from_secs(3600),
                ttl_known: false,
            },
        );
    }

    fn value_of(&self, key: &str) -> Option<Vec<u8>> {
        let table = self.keys.lock().unwrap();
        match table.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            _ => None,
        }
    }

    fn has_finite_ttl(&self, key: &str) -> bool {
        let table = self.keys.lock().unwrap();
        table.get(key).map(|e| e.ttl_known).unwrap_or(false)
    }
}

enum Op {
    Acquire,
    Extend,
    Release,
}

fn op_for(script: &str) -> Op {
    if script.contains("ACQUIRE_MARKER") {
        Op::Acquire
    } else if script.contains("EXTEND_MARKER") {
        Op::Extend
    } else {
        Op::Release
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn eval_sha(&self, _hash: &str, _keys: &[String], _args: &[Vec<u8>]) -> Result<i64, StoreError> {
        Err(StoreError {
            message: "NOSCRIPT No matching script".into(),
            no_script: true,
        })
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[Vec<u8>]) -> Result<i64, StoreError> {
        if self.unreachable {
            return Err(StoreError::other("connection refused"));
        }
        let mut table = self.keys.lock().unwrap();
        let now = Instant::now();
        table.retain(|_, e| e.expires_at > now);

        match op_for(script) {
            Op::Acquire => {
                let value = args[0].clone();
                let ms: u64 = String::from_utf8_lossy(&args[1]).parse().unwrap_or(0);
                if keys.iter().any(|k| table.contains_key(k)) {
                    return Ok(0);
                }
                for k in keys {
                    table.insert(
                        k.clone(),
                        Entry {
                            value: value.clone(),
                            expires_at: now + Duration::from_millis(ms),
                            ttl_known: true,
                        },
                    );
                }
                Ok(keys.len() as i64)
            }
            Op::Extend => {
                let value = args[0].clone();
                let ms: u64 = String::from_utf8_lossy(&args[1]).parse().unwrap_or(0);
                if keys.iter().any(|k| table.get(k).map(|e| &e.value) != Some(&value)) {
                    return Ok(0);
                }
                for k in keys {
                    table.insert(
                        k.clone(),
                        Entry {
                            value: value.clone(),
                            expires_at: now + Duration::from_millis(ms),
                            ttl_known: true,
                        },
                    );
                }
                Ok(keys.len() as i64)
            }
            Op::Release => {
                let value = args[0].clone();
                let mut count = 0;
                for k in keys {
                    if table.get(k).map(|e| &e.value) == Some(&value) {
                        table.remove(k);
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    async fn quit(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn redlock_over(stores: Vec<Arc<ScriptedStore>>, settings: Settings) -> (Redlock, Vec<Arc<ScriptedStore>>) {
    let dyn_stores: Vec<Arc<dyn Store>> = stores
        .iter()
        .cloned()
        .map(|s| s as Arc<dyn Store>)
        .collect();
    (Redlock::new(dyn_stores, settings).unwrap(), stores)
}

fn fast_settings() -> Settings {
    Settings::default()
        .with_retry_count(10)
        .with_retry_delay(Duration::from_millis(5))
        .with_retry_jitter(Duration::from_millis(1))
}

// Scenario 1: acquire, extend, release round-trips the key's value and
// finally clears it.
#[tokio::test(start_paused = true)]
async fn scenario_acquire_extend_release() {
    let (redlock, stores) = redlock_over(vec![Arc::new(ScriptedStore::new())], fast_settings());
    let mut lock = redlock
        .acquire(vec!["{r}a".into()], Duration::from_millis(10_000), Overrides::default())
        .await
        .unwrap();
    assert_eq!(stores[0].value_of("{r}a"), Some(lock.value.clone().into_bytes()));

    lock.extend(Duration::from_millis(30_000), Overrides::default())
        .await
        .unwrap();
    assert_eq!(stores[0].value_of("{r}a"), Some(lock.value.clone().into_bytes()));

    lock.release(Overrides::default()).await.unwrap();
    assert_eq!(stores[0].value_of("{r}a"), None);
}

// Scenario 2: a concurrent acquire over a partially overlapping resource
// set fails with the full attempt history and resource-locked votes,
// without disturbing the first lock's keys.
#[tokio::test(start_paused = true)]
async fn scenario_overlapping_acquire_fails_cleanly() {
    let (redlock, stores) = redlock_over(vec![Arc::new(ScriptedStore::new())], fast_settings());
    let first = redlock
        .acquire(
            vec!["{r}14".into(), "{r}25".into()],
            Duration::from_millis(10_000),
            Overrides::default(),
        )
        .await
        .unwrap();

    let err = redlock
        .acquire(
            vec!["{r}25".into(), "{r}36".into()],
            Duration::from_millis(10_000),
            Overrides::default(),
        )
        .await
        .unwrap_err();

    match err {
        Error::Execution(exec_err) => assert_eq!(exec_err.attempts.len(), 11),
        _ => panic!("expected ExecutionError"),
    }
    assert_eq!(stores[0].value_of("{r}14"), Some(first.value.clone().into_bytes()));
    assert_eq!(stores[0].value_of("{r}25"), Some(first.value.clone().into_bytes()));
    assert_eq!(stores[0].value_of("{r}36"), None);
}

// Scenario 3: after the first lock's short TTL has passed, the same
// resource can be acquired again, with a fresh value.
#[tokio::test(start_paused = true)]
async fn scenario_expired_lock_can_be_reacquired() {
    let (redlock, _stores) = redlock_over(vec![Arc::new(ScriptedStore::new())], fast_settings());
    let first = redlock
        .acquire(vec!["{r}d".into()], Duration::from_millis(200), Overrides::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let second = redlock
        .acquire(vec!["{r}d".into()], Duration::from_millis(200), Overrides::default())
        .await
        .unwrap();
    assert_ne!(first.value, second.value);
}

// Scenario 4: an unreachable store fails every attempt with a
// connection-level error on every vote.
#[tokio::test(start_paused = true)]
async fn scenario_unreachable_store_fails_with_connection_errors() {
    let (redlock, _stores) = redlock_over(vec![Arc::new(ScriptedStore::unreachable())], fast_settings());
    let err = redlock
        .acquire(vec!["{r}b".into()], Duration::from_millis(10_000), Overrides::default())
        .await
        .unwrap_err();
    match err {
        Error::Execution(exec_err) => {
            assert_eq!(exec_err.attempts.len(), 11);
        }
        _ => panic!("expected ExecutionError"),
    }
}

// Scenario 5: a three-store cluster where one store is pre-occupied by a
// foreign value still reaches quorum via the other two, and release only
// clears the stores it actually granted.
#[tokio::test(start_paused = true)]
async fn scenario_minority_foreign_value_does_not_block_quorum() {
    let minority = Arc::new(ScriptedStore::new());
    minority.seed_foreign("{r}b", "someone-elses-token");
    let (redlock, stores) = redlock_over(
        vec![minority, Arc::new(ScriptedStore::new()), Arc::new(ScriptedStore::new())],
        fast_settings(),
    );

    let mut lock = redlock
        .acquire(vec!["{r}b".into()], Duration::from_millis(10_000), Overrides::default())
        .await
        .unwrap();

    assert_eq!(
        stores[0].value_of("{r}b"),
        Some(b"someone-elses-token".to_vec())
    );
    assert!(!stores[0].has_finite_ttl("{r}b"));

    let result: ExecutionResult = lock.release(Overrides::default()).await.unwrap();
    assert!(!result.attempts.is_empty());
    assert_eq!(stores[1].value_of("{r}b"), None);
    assert_eq!(stores[2].value_of("{r}b"), None);
    assert_eq!(
        stores[0].value_of("{r}b"),
        Some(b"someone-elses-token".to_vec())
    );
}

// Scenario 6: a majority of stores pre-occupied means acquire fails with
// ResourceLockedError votes describing a zero-of-one grant.
#[tokio::test(start_paused = true)]
async fn scenario_majority_foreign_value_fails_acquire() {
    let a = Arc::new(ScriptedStore::new());
    let b = Arc::new(ScriptedStore::new());
    let c = Arc::new(ScriptedStore::new());
    a.seed_foreign("{r}c", "foreign");
    b.seed_foreign("{r}c", "foreign");
    let (redlock, _stores) = redlock_over(vec![a, b, c], fast_settings());

    let err = redlock
        .acquire(vec!["{r}c".into()], Duration::from_millis(10_000), Overrides::default())
        .await
        .unwrap_err();

    match err {
        Error::Execution(exec_err) => {
            assert_eq!(exec_err.attempts.len(), 11);
        }
        _ => panic!("expected ExecutionError"),
    }
}

// Scenario 7: a `using` routine that outlives the lock's raw duration
// completes normally thanks to automatic extension, un-aborted, and the
// key is gone once the call returns.
#[tokio::test(start_paused = true)]
async fn scenario_using_extends_through_a_long_routine() {
    let store = Arc::new(ScriptedStore::new());
    let (redlock, stores) = redlock_over(
        vec![store],
        Settings::default()
            .with_retry_count(10)
            .with_retry_delay(Duration::from_millis(5))
            .with_retry_jitter(Duration::from_millis(1))
            .with_automatic_extension_threshold(Duration::from_millis(200)),
    );

    let observed_value = redquorum::using(
        &redlock,
        vec!["{r}x".into()],
        Duration::from_millis(500),
        Overrides::default(),
        |signal| async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            assert!(!signal.is_aborted());
            stores[0].value_of("{r}x")
        },
    )
    .await
    .unwrap();

    assert!(observed_value.is_some());
}
