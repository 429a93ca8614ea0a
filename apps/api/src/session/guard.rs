//! Per-session in-flight guard: at most one generation call per session at a time.
//!
//! A second request for a session that already holds a permit is rejected with
//! `SESSION_BUSY`, never queued. Permits release themselves on drop, so an
//! abandoned request frees its session as soon as the handler future is dropped.
//! Leases that can expire are renewed for as long as the permit is held.

use std::collections::HashSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;

/// Which guard implementation the API runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardBackend {
    /// Shared lease in Redis. Required when more than one API instance runs.
    Redis,
    /// In-process set. Only correct for a single instance.
    Local,
}

impl FromStr for GuardBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(GuardBackend::Redis),
            "local" => Ok(GuardBackend::Local),
            other => Err(format!("unknown turn guard backend '{other}'")),
        }
    }
}

/// Extends the lease only if it still holds our token.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Deletes the lock only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[async_trait]
pub trait TurnGuard: Send + Sync {
    async fn acquire(&self, session_id: Uuid) -> Result<TurnPermit, AppError>;
}

/// Held while a session step runs.
pub struct TurnPermit {
    session_id: Uuid,
    lost: Arc<AtomicBool>,
    keepalive: Option<JoinHandle<()>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl TurnPermit {
    fn new(session_id: Uuid, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            session_id,
            lost: Arc::new(AtomicBool::new(false)),
            keepalive: None,
            release: Some(Box::new(release)),
        }
    }

    /// Calls `refresh` every `every` until it reports the lease gone or the
    /// permit is dropped. A lost lease marks the permit as no longer held.
    fn keep_alive<F, Fut>(mut self, every: Duration, mut refresh: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let lost = Arc::clone(&self.lost);
        let session_id = self.session_id;
        self.keepalive = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(MIN_RENEW_INTERVAL));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !refresh().await {
                    warn!("Turn lease for session {session_id} lapsed while held");
                    lost.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }));
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Fails once the lease has lapsed: another request may own the session by
    /// now, so nothing computed under this permit may be written.
    pub fn ensure_held(&self) -> Result<(), AppError> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(AppError::SessionBusy(self.session_id));
        }
        Ok(())
    }
}

impl Drop for TurnPermit {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// In-process guard. Correct for a single API instance and used in tests.
#[derive(Clone, Default)]
pub struct LocalTurnGuard {
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl LocalTurnGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TurnGuard for LocalTurnGuard {
    async fn acquire(&self, session_id: Uuid) -> Result<TurnPermit, AppError> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id);
        if !inserted {
            return Err(AppError::SessionBusy(session_id));
        }

        let in_flight = Arc::clone(&self.in_flight);
        Ok(TurnPermit::new(session_id, move || {
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&session_id);
        }))
    }
}

/// Cross-instance guard: a `SET NX PX` lease per session in Redis.
///
/// The lease expires after `ttl` even if the holder dies, so a crashed instance
/// cannot lock a session forever. A live holder renews it every third of `ttl`,
/// however long the generation call takes. Renewal and release both compare a
/// random token first, so a holder whose lease lapsed never touches a lease
/// someone else took over.
#[derive(Clone)]
pub struct RedisTurnGuard {
    client: redis::Client,
    ttl: Duration,
}

impl RedisTurnGuard {
    pub fn new(client: redis::Client, ttl: Duration) -> Self {
        Self { client, ttl }
    }
}

pub fn lock_key(session_id: Uuid) -> String {
    format!("holdai:turn:{session_id}")
}

#[async_trait]
impl TurnGuard for RedisTurnGuard {
    async fn acquire(&self, session_id: Uuid) -> Result<TurnPermit, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = lock_key(session_id);
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        if acquired.is_none() {
            debug!("Session {session_id} busy, lease {key} is held");
            return Err(AppError::SessionBusy(session_id));
        }

        let ttl_ms = self.ttl.as_millis() as u64;
        let renew = {
            let (key, token, conn) = (key.clone(), token.clone(), conn.clone());
            move || {
                let (key, token, mut conn) = (key.clone(), token.clone(), conn.clone());
                async move {
                    let renewed: redis::RedisResult<i32> = redis::Script::new(RENEW_SCRIPT)
                        .key(&key)
                        .arg(&token)
                        .arg(ttl_ms)
                        .invoke_async(&mut conn)
                        .await;
                    match renewed {
                        Ok(n) => n == 1,
                        Err(e) => {
                            // the lease may still be live; the next tick tells
                            warn!("Failed to renew {key}: {e}");
                            true
                        }
                    }
                }
            }
        };

        let permit = TurnPermit::new(session_id, move || {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!("No runtime to release {key}; it expires on its own");
                return;
            };
            handle.spawn(async move {
                let released: redis::RedisResult<i32> = redis::Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await;
                if let Err(e) = released {
                    warn!("Failed to release {key}: {e}; it expires on its own");
                }
            });
        });
        Ok(permit.keep_alive(self.ttl / 3, renew))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_busy() {
        let guard = LocalTurnGuard::new();
        let id = Uuid::new_v4();
        let _permit = guard.acquire(id).await.unwrap();
        let err = guard.acquire(id).await.err().unwrap();
        assert!(matches!(err, AppError::SessionBusy(busy) if busy == id));
    }

    #[tokio::test]
    async fn test_drop_releases_permit() {
        let guard = LocalTurnGuard::new();
        let id = Uuid::new_v4();
        let permit = guard.acquire(id).await.unwrap();
        assert_eq!(permit.session_id(), id);
        drop(permit);
        assert!(guard.acquire(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let guard = LocalTurnGuard::new();
        let _a = guard.acquire(Uuid::new_v4()).await.unwrap();
        assert!(guard.acquire(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_request_frees_session() {
        let guard = LocalTurnGuard::new();
        let id = Uuid::new_v4();
        let held = guard.clone();
        let task = tokio::spawn(async move {
            let _permit = held.acquire(id).await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        tokio::task::yield_now().await;
        while guard.acquire(id).await.is_ok() {
            // the spawned task has not taken the permit yet
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(guard.acquire(id).await.is_ok());
    }

    fn counting_refresh(
        calls: &Arc<std::sync::atomic::AtomicU32>,
        still_held: bool,
    ) -> impl FnMut() -> std::future::Ready<bool> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(still_held)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_renewed_while_held_and_stops_on_drop() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let permit = TurnPermit::new(Uuid::new_v4(), || {})
            .keep_alive(Duration::from_millis(100), counting_refresh(&calls, true));

        // a generation call that outlives several lease lifetimes
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(permit.ensure_held().is_ok());

        drop(permit);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_lease_blocks_writes() {
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let id = Uuid::new_v4();
        let permit = TurnPermit::new(id, || {})
            .keep_alive(Duration::from_millis(100), counting_refresh(&calls, false));
        assert!(permit.ensure_held().is_ok());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = permit.ensure_held().unwrap_err();
        assert!(matches!(err, AppError::SessionBusy(busy) if busy == id));
    }

    #[test]
    fn test_guard_backend_parses() {
        assert_eq!("redis".parse::<GuardBackend>().unwrap(), GuardBackend::Redis);
        assert_eq!(" Local ".parse::<GuardBackend>().unwrap(), GuardBackend::Local);
        assert!("memcached".parse::<GuardBackend>().is_err());
    }

    #[test]
    fn test_lock_key_is_per_session() {
        let id = Uuid::nil();
        assert_eq!(
            lock_key(id),
            "holdai:turn:00000000-0000-0000-0000-000000000000"
        );
    }
}
