//! Session-scoped resource cache
//!
//! Each entry is either building or ready. The first caller for an absent key
//! spawns the build as a background task; every concurrent caller awaits the
//! same shared future, so a resource is constructed at most once per key at a
//! time. Callers stop waiting after a bounded time but the build itself runs
//! to completion and still lands in the cache.
//!
//! Every build is tagged with a generation. Invalidating a key removes the
//! entry, so a build that finishes afterwards finds a different generation (or
//! nothing) and is handed to its waiters without being cached.

use crate::errors::{AppError, Result};
use crate::metrics;
use crate::session::{EndReason, SessionHook, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type BuildOutput<R> = std::result::Result<Arc<R>, String>;
type SharedBuild<R> = Shared<BoxFuture<'static, BuildOutput<R>>>;

enum Slot<R> {
    Building { generation: u64, build: SharedBuild<R> },
    Ready(Arc<R>),
}

/// Cache of expensive per-session resources
pub struct ResourceCache<R> {
    entries: Arc<DashMap<SessionId, Slot<R>>>,
    next_generation: AtomicU64,
    wait_timeout: Duration,
}

impl<R> ResourceCache<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            wait_timeout,
        }
    }

    /// Return the cached resource, building it if absent
    ///
    /// `builder` is only called when no entry exists and must return quickly;
    /// the work belongs in the future it produces.
    pub async fn get_or_build<F, Fut>(&self, session_id: &SessionId, builder: F) -> Result<Arc<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let build = match self.entries.entry(session_id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(resource) => {
                    metrics::record_cache(true, "resource");
                    return Ok(resource.clone());
                }
                Slot::Building { build, .. } => {
                    debug!(session_id = %session_id, "Joining in-flight resource build");
                    build.clone()
                }
            },
            Entry::Vacant(entry) => {
                metrics::record_cache(false, "resource");
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let task = tokio::spawn(run_build(
                    self.entries.clone(),
                    session_id.clone(),
                    generation,
                    builder(),
                ));
                let build = async move {
                    match task.await {
                        Ok(output) => output,
                        Err(e) => Err(format!("resource build task failed: {}", e)),
                    }
                }
                .boxed()
                .shared();
                entry.insert(Slot::Building {
                    generation,
                    build: build.clone(),
                });
                build
            }
        };

        match tokio::time::timeout(self.wait_timeout, build).await {
            Ok(Ok(resource)) => Ok(resource),
            Ok(Err(message)) => Err(AppError::BuildFailure { message }),
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Gave up waiting on resource build"
                );
                Err(AppError::BuildTimeout {
                    timeout_ms: self.wait_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Drop an entry; the next access rebuilds
    pub fn invalidate(&self, session_id: &SessionId) -> bool {
        let removed = self.entries.remove(session_id).is_some();
        if removed {
            debug!(session_id = %session_id, "Resource invalidated");
        }
        removed
    }

    pub fn invalidate_many<'a>(&self, session_ids: impl IntoIterator<Item = &'a SessionId>) -> usize {
        session_ids
            .into_iter()
            .filter(|session_id| self.invalidate(session_id))
            .count()
    }

    /// Whether a finished resource is cached for `session_id`
    pub fn is_ready(&self, session_id: &SessionId) -> bool {
        self.entries
            .get(session_id)
            .map(|slot| matches!(*slot, Slot::Ready(_)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        info!(dropped, "Resource cache cleared");
    }
}

impl<R> SessionHook for ResourceCache<R>
where
    R: Send + Sync + 'static,
{
    fn session_ended(&self, session_id: &SessionId, _reason: EndReason) {
        self.invalidate(session_id);
    }
}

async fn run_build<R, Fut>(
    entries: Arc<DashMap<SessionId, Slot<R>>>,
    session_id: SessionId,
    generation: u64,
    build: Fut,
) -> BuildOutput<R>
where
    Fut: Future<Output = Result<R>>,
{
    let started = Instant::now();
    debug!(session_id = %session_id, generation, "Resource build started");

    let outcome = match AssertUnwindSafe(build).catch_unwind().await {
        Ok(outcome) => outcome.map_err(|e| e.to_string()),
        Err(_) => Err("resource build panicked".to_string()),
    };
    let elapsed = started.elapsed();
    let is_current =
        |slot: &Slot<R>| matches!(slot, Slot::Building { generation: g, .. } if *g == generation);

    match outcome {
        Ok(resource) => {
            let resource = Arc::new(resource);
            let cached = match entries.get_mut(&session_id) {
                Some(mut slot) if is_current(&*slot) => {
                    *slot = Slot::Ready(resource.clone());
                    true
                }
                _ => false,
            };
            info!(
                session_id = %session_id,
                cached,
                duration_ms = elapsed.as_millis() as u64,
                "Resource build finished"
            );
            metrics::record_build(if cached { "success" } else { "discarded" }, elapsed.as_secs_f64());
            Ok(resource)
        }
        Err(message) => {
            entries.remove_if(&session_id, |_, slot| is_current(slot));
            warn!(session_id = %session_id, error = %message, "Resource build failed");
            metrics::record_build("failure", elapsed.as_secs_f64());
            Err(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    struct Resource(usize);

    fn sid(token: &str) -> SessionId {
        SessionId::from(token)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_build() {
        let cache = Arc::new(ResourceCache::<Resource>::new(Duration::from_secs(5)));
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let builds = builds.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_build(&sid("sess_a"), move || async move {
                            let n = builds.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Resource(n))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut resources = Vec::new();
        for task in tasks {
            resources.push(task.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(resources.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(cache.is_ready(&sid("sess_a")));
    }

    #[tokio::test]
    async fn test_failed_build_leaves_entry_absent() {
        let cache = ResourceCache::<Resource>::new(Duration::from_secs(5));

        let err = cache
            .get_or_build(&sid("sess_a"), || async {
                Err(AppError::Storage {
                    message: "disk gone".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BuildFailure { .. }));
        assert!(cache.is_empty());

        let resource = cache
            .get_or_build(&sid("sess_a"), || async { Ok(Resource(7)) })
            .await
            .unwrap();
        assert_eq!(resource.0, 7);
    }

    async fn explode() -> Result<Resource> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panicking_build_is_a_failure() {
        let cache = ResourceCache::<Resource>::new(Duration::from_secs(5));
        let err = cache
            .get_or_build(&sid("sess_a"), explode)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BuildFailure { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_forces_rebuild() {
        let cache = ResourceCache::<Resource>::new(Duration::from_secs(5));
        let first = cache
            .get_or_build(&sid("sess_a"), || async { Ok(Resource(1)) })
            .await
            .unwrap();
        let hit = cache
            .get_or_build(&sid("sess_a"), || async { Ok(Resource(99)) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &hit));

        assert!(cache.invalidate(&sid("sess_a")));
        assert!(!cache.invalidate(&sid("sess_a")));
        let second = cache
            .get_or_build(&sid("sess_a"), || async { Ok(Resource(2)) })
            .await
            .unwrap();
        assert_eq!(second.0, 2);
    }

    #[tokio::test]
    async fn test_build_finishing_after_invalidation_is_not_cached() {
        let cache = Arc::new(ResourceCache::<Resource>::new(Duration::from_secs(5)));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_build(&sid("sess_a"), move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(Resource(1))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert!(cache.invalidate(&sid("sess_a")));
        release_tx.send(()).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().0, 1);
        assert!(!cache.is_ready(&sid("sess_a")));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_do_not_wait_on_each_other() {
        let cache = Arc::new(ResourceCache::<Resource>::new(Duration::from_secs(5)));
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_build(&sid("sess_a"), move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(Resource(1))
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let other = tokio::time::timeout(
            Duration::from_millis(500),
            cache.get_or_build(&sid("sess_b"), || async { Ok(Resource(2)) }),
        )
        .await
        .expect("sess_b must not wait on sess_a")
        .unwrap();
        assert_eq!(other.0, 2);
        assert!(!cache.is_ready(&sid("sess_a")));

        release_tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap().0, 1);
        assert!(cache.is_ready(&sid("sess_a")));
    }

    #[tokio::test]
    async fn test_wait_timeout_keeps_build_running() {
        let cache = ResourceCache::<Resource>::new(Duration::from_millis(20));
        let builds = Arc::new(AtomicUsize::new(0));

        let counter = builds.clone();
        let err = cache
            .get_or_build(&sid("sess_a"), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Resource(1))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BuildTimeout { timeout_ms: 20 }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.is_ready(&sid("sess_a")));

        let counter = builds.clone();
        let resource = cache
            .get_or_build(&sid("sess_a"), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Resource(2))
            })
            .await
            .unwrap();
        assert_eq!(resource.0, 1);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_end_drops_entry() {
        let cache = ResourceCache::<Resource>::new(Duration::from_secs(5));
        cache
            .get_or_build(&sid("sess_a"), || async { Ok(Resource(1)) })
            .await
            .unwrap();
        cache
            .get_or_build(&sid("sess_b"), || async { Ok(Resource(2)) })
            .await
            .unwrap();

        cache.session_ended(&sid("sess_a"), EndReason::Logout);
        assert!(!cache.is_ready(&sid("sess_a")));
        assert!(cache.is_ready(&sid("sess_b")));
        assert_eq!(cache.invalidate_many([&sid("sess_b"), &sid("sess_c")]), 1);
        assert!(cache.is_empty());
    }
}
