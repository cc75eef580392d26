//! C2 PeerPool: bounded worker pool for outbound replication pulls,
//! keyed by `(ConnectionType, peerId)` so a peer already being pulled from
//! is never double-scheduled. The backoff policy is grounded in the
//! teacher's `run_tcp_client` exponential-reconnect loop, generalized into
//! a pluggable trait so callers aren't stuck with one congestion model.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::transport::ConnectionType;

pub type PeerKey = (ConnectionType, String);
type BoxedAction = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Admission and backoff policy for outbound replication attempts.
pub trait SchedulingPolicy: Send + Sync {
    /// Whether a new action may start given `inflight` actions already
    /// running.
    fn admit(&self, inflight: usize) -> bool;
    /// Delay before retrying after `attempt` prior failures for the same
    /// key (0 on the first attempt).
    fn backoff(&self, attempt: u32) -> Duration;
}

/// Admits everything immediately and never backs off.
///
/// This is the default because the source this crate is modeled on made
/// the same choice, but it performs **no congestion control whatsoever** —
/// every submission spawns a task immediately regardless of how many are
/// already in flight. Production deployments must supply a
/// [`BoundedBackoffPolicy`] or an equivalent.
pub struct ImmediateStartPolicy;

impl SchedulingPolicy for ImmediateStartPolicy {
    fn admit(&self, _inflight: usize) -> bool {
        true
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Caps concurrent in-flight actions and backs off exponentially per key,
/// mirroring the teacher's `INITIAL_RECONNECT_DELAY_SECS` /
/// `MAX_RECONNECT_DELAY_SECS` reconnect loop.
pub struct BoundedBackoffPolicy {
    pub max_concurrent: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BoundedBackoffPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl SchedulingPolicy for BoundedBackoffPolicy {
    fn admit(&self, inflight: usize) -> bool {
        inflight < self.max_concurrent
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

struct Inner {
    handles: Mutex<HashMap<PeerKey, JoinHandle<()>>>,
    policy: Box<dyn SchedulingPolicy>,
}

/// Submits idempotent, key-deduplicated actions to a bounded pool.
#[derive(Clone)]
pub struct PeerPool {
    inner: Arc<Inner>,
}

impl PeerPool {
    pub fn new(policy: Box<dyn SchedulingPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handles: Mutex::new(HashMap::new()),
                policy,
            }),
        }
    }

    /// Submit `action` under `key`. If an action for `key` is already
    /// in-flight this is a no-op and `false` is returned. If the policy
    /// does not admit a new action given the current in-flight count, the
    /// submission is dropped and `false` is returned.
    pub fn submit(&self, key: PeerKey, action: BoxedAction) -> bool {
        let mut handles = self.inner.handles.lock();
        handles.retain(|_, h| !h.is_finished());

        if handles.contains_key(&key) {
            return false;
        }
        if !self.inner.policy.admit(handles.len()) {
            return false;
        }

        let handle = tokio::spawn(action);
        handles.insert(key, handle);
        true
    }

    /// Cancel the in-flight action for `key`, if any (beacon expiry or
    /// peer unavailability per §4.7).
    pub fn cancel(&self, key: &PeerKey) {
        if let Some(handle) = self.inner.handles.lock().remove(key) {
            handle.abort();
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.inner.policy.backoff(attempt)
    }

    pub fn inflight_count(&self) -> usize {
        let mut handles = self.inner.handles.lock();
        handles.retain(|_, h| !h.is_finished());
        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn duplicate_submission_for_same_key_is_a_no_op() {
        let pool = PeerPool::new(Box::new(ImmediateStartPolicy));
        let counter = Arc::new(AtomicUsize::new(0));
        let key: PeerKey = (ConnectionType::TcpNative, "peer-1".into());

        let c1 = counter.clone();
        let admitted_first = pool.submit(
            key.clone(),
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                c1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let c2 = counter.clone();
        let admitted_second = pool.submit(
            key.clone(),
            Box::pin(async move {
                c2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(admitted_first);
        assert!(!admitted_second);
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_action() {
        let pool = PeerPool::new(Box::new(ImmediateStartPolicy));
        let ran_to_completion = Arc::new(AtomicUsize::new(0));
        let key: PeerKey = (ConnectionType::Bluetooth, "peer-2".into());

        let flag = ran_to_completion.clone();
        pool.submit(
            key.clone(),
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(200)).await;
                flag.fetch_add(1, Ordering::SeqCst);
            }),
        );
        pool.cancel(&key);
        tokio::time::sleep(StdDuration::from_millis(250)).await;
        assert_eq!(ran_to_completion.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bounded_backoff_doubles_and_caps() {
        let policy = BoundedBackoffPolicy {
            max_concurrent: 2,
            initial_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), StdDuration::from_secs(1));
        assert_eq!(policy.backoff(1), StdDuration::from_secs(2));
        assert_eq!(policy.backoff(10), StdDuration::from_secs(10));
        assert!(policy.admit(1));
        assert!(!policy.admit(2));
    }
}
