//! Echo correlation: matching API responses to the calls that caused them.
//!
//! Each outbound [`ApiCall`] is registered before it is written. Registration
//! assigns an `echo` token and parks a one-shot slot in the pending table;
//! the caller holds a [`PendingCall`] and awaits it. Exactly one of these
//! retires an entry:
//!
//! | Event | Outcome for the caller |
//! |-------|------------------------|
//! | response with matching echo | the [`ApiResponse`] (or [`CallError::ApiFailed`]) |
//! | deadline passes | [`CallError::Timeout`] |
//! | connection lost / shut down | [`CallError::ConnectionClosed`] |
//! | caller drops the handle | nothing; the entry is removed |
//!
//! Anything arriving for a retired token is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{CallError, CallResult};
use crate::model::api::{ApiCall, ApiResponse};

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Slot = oneshot::Sender<CallResult<ApiResponse>>;

struct PendingEntry {
    action: String,
    deadline: Instant,
    slot: Slot,
}

struct Table {
    next_echo: u64,
    entries: HashMap<String, PendingEntry>,
}

struct Shared {
    table: Mutex<Table>,
    pending: watch::Sender<usize>,
    default_timeout: Duration,
}

impl Shared {
    fn remove(&self, echo: &str) -> Option<PendingEntry> {
        let mut table = self.table.lock();
        let entry = table.entries.remove(echo);
        if entry.is_some() {
            self.pending.send_replace(table.entries.len());
        }
        entry
    }
}

/// Pending-call table shared by callers and the connection reader.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct EchoCorrelator {
    shared: Arc<Shared>,
}

impl Default for EchoCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl EchoCorrelator {
    /// Creates an empty correlator with the given default timeout.
    pub fn new(default_timeout: Duration) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table {
                    next_echo: 1,
                    entries: HashMap::new(),
                }),
                pending,
                default_timeout,
            }),
        }
    }

    /// Returns the timeout applied when `register` gets `None`.
    pub fn default_timeout(&self) -> Duration {
        self.shared.default_timeout
    }

    /// Assigns an echo token to `call` and parks a pending entry for it.
    ///
    /// Must happen before the call is written, so a fast response always
    /// finds its entry.
    pub fn register(&self, mut call: ApiCall, timeout: Option<Duration>) -> (ApiCall, PendingCall) {
        let (slot, receiver) = oneshot::channel();
        let deadline = Instant::now() + timeout.unwrap_or(self.shared.default_timeout);

        let echo = {
            let mut table = self.shared.table.lock();
            let echo = loop {
                let candidate = table.next_echo.to_string();
                table.next_echo = table.next_echo.wrapping_add(1);
                if !table.entries.contains_key(&candidate) {
                    break candidate;
                }
            };
            table.entries.insert(
                echo.clone(),
                PendingEntry {
                    action: call.action.clone(),
                    deadline,
                    slot,
                },
            );
            self.shared.pending.send_replace(table.entries.len());
            echo
        };

        trace!(action = %call.action, echo = %echo, "Registered pending call");
        call.echo = Some(echo.clone());
        let handle = PendingCall {
            echo,
            deadline,
            receiver,
            shared: Arc::clone(&self.shared),
            finished: false,
        };
        (call, handle)
    }

    /// Delivers a response to its pending call.
    ///
    /// Returns `false` if the echo is absent or unknown; the response is then
    /// discarded.
    pub fn resolve(&self, response: ApiResponse) -> bool {
        let Some(echo) = response.echo.clone() else {
            debug!(status = %response.status, "Discarding API response without echo");
            return false;
        };
        let Some(entry) = self.shared.remove(&echo) else {
            debug!(echo = %echo, "Discarding API response for unknown echo (timed out?)");
            return false;
        };
        trace!(action = %entry.action, echo = %echo, "Resolved pending call");
        entry.slot.send(response.into_result()).is_ok()
    }

    /// Fails one pending call.
    pub fn fail(&self, echo: &str, error: CallError) -> bool {
        match self.shared.remove(echo) {
            Some(entry) => {
                debug!(action = %entry.action, echo = %echo, error = %error, "Failing pending call");
                entry.slot.send(Err(error)).is_ok()
            }
            None => false,
        }
    }

    /// Fails every pending call, returning how many there were.
    pub fn fail_all(&self, error: CallError) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.shared.table.lock();
            let drained = table.entries.drain().map(|(_, entry)| entry).collect();
            self.shared.pending.send_replace(0);
            drained
        };
        let count = drained.len();
        if count > 0 {
            debug!(count = count, error = %error, "Failing all pending calls");
        }
        for entry in drained {
            let _ = entry.slot.send(Err(error.clone()));
        }
        count
    }

    /// Fails every call whose deadline is at or before `now` with
    /// [`CallError::Timeout`].
    pub fn expire(&self, now: Instant) -> usize {
        let expired: Vec<(String, PendingEntry)> = {
            let mut table = self.shared.table.lock();
            let overdue: Vec<String> = table
                .entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(echo, _)| echo.clone())
                .collect();
            let expired: Vec<_> = overdue
                .into_iter()
                .filter_map(|echo| table.entries.remove(&echo).map(|entry| (echo, entry)))
                .collect();
            if !expired.is_empty() {
                self.shared.pending.send_replace(table.entries.len());
            }
            expired
        };
        for (echo, entry) in &expired {
            debug!(action = %entry.action, echo = %echo, "Pending call timed out");
        }
        let count = expired.len();
        for (_, entry) in expired {
            let _ = entry.slot.send(Err(CallError::Timeout));
        }
        count
    }

    /// Returns the number of pending calls.
    pub fn pending_count(&self) -> usize {
        self.shared.table.lock().entries.len()
    }

    /// Watches the number of pending calls.
    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.shared.pending.subscribe()
    }
}

/// Caller side of a registered call.
///
/// Dropping it before completion cancels the call: the pending entry is
/// removed and a late response is discarded.
pub struct PendingCall {
    echo: String,
    deadline: Instant,
    receiver: oneshot::Receiver<CallResult<ApiResponse>>,
    shared: Arc<Shared>,
    finished: bool,
}

impl PendingCall {
    /// Returns the echo token of this call.
    pub fn echo(&self) -> &str {
        &self.echo
    }

    /// Returns the instant after which the call times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits for the call to be retired.
    pub async fn wait(mut self) -> CallResult<ApiResponse> {
        let result = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::ConnectionClosed),
            Err(_) => match self.receiver.try_recv() {
                Ok(result) => result,
                Err(_) => {
                    self.shared.remove(&self.echo);
                    debug!(echo = %self.echo, "Pending call timed out");
                    Err(CallError::Timeout)
                }
            },
        };
        self.finished = true;
        result
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.finished && self.shared.remove(&self.echo).is_some() {
            debug!(echo = %self.echo, "Pending call cancelled by caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::api::ApiStatus;
    use serde_json::json;
    use std::collections::HashSet;

    fn response(echo: &str, data: serde_json::Value) -> ApiResponse {
        let mut response = ApiResponse::ok(data);
        response.echo = Some(echo.to_string());
        response
    }

    #[tokio::test]
    async fn test_response_resolves_matching_call() {
        let correlator = EchoCorrelator::default();
        let (call, handle) = correlator.register(ApiCall::new("send_msg"), None);
        let echo = call.echo.clone().unwrap();
        assert_eq!(handle.echo(), echo);
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.resolve(response(&echo, json!({"message_id": 42}))));
        let result = handle.wait().await.unwrap();
        assert_eq!(result.data, Some(json!({"message_id": 42})));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_echo_is_discarded() {
        let correlator = EchoCorrelator::default();
        let (_call, handle) = correlator.register(ApiCall::new("get_status"), None);

        assert!(!correlator.resolve(response("does-not-exist", json!(null))));
        let mut no_echo = ApiResponse::ok(json!(null));
        no_echo.echo = None;
        assert!(!correlator.resolve(no_echo));

        assert_eq!(correlator.pending_count(), 1);
        drop(handle);
    }

    #[tokio::test]
    async fn test_failed_response_becomes_api_error() {
        let correlator = EchoCorrelator::default();
        let (call, handle) = correlator.register(ApiCall::new("delete_msg"), None);
        let failed = ApiResponse {
            status: ApiStatus::Failed,
            retcode: 1404,
            data: None,
            message: None,
            wording: Some("message not found".into()),
            echo: call.echo,
        };
        assert!(correlator.resolve(failed));
        assert!(matches!(
            handle.wait().await,
            Err(CallError::ApiFailed { retcode: 1404, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_discarded() {
        let correlator = EchoCorrelator::default();
        let (call, handle) =
            correlator.register(ApiCall::new("get_msg"), Some(Duration::from_millis(100)));

        assert!(matches!(handle.wait().await, Err(CallError::Timeout)));
        assert_eq!(correlator.pending_count(), 0);

        let echo = call.echo.unwrap();
        assert!(!correlator.resolve(response(&echo, json!({}))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_fails_overdue_calls_only() {
        let correlator = EchoCorrelator::default();
        let (_, short) = correlator.register(ApiCall::new("a"), Some(Duration::from_secs(1)));
        let (_, long) = correlator.register(ApiCall::new("b"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(correlator.expire(Instant::now()), 1);
        assert_eq!(correlator.pending_count(), 1);
        assert!(matches!(short.wait().await, Err(CallError::Timeout)));
        drop(long);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_reaches_every_pending_call() {
        let correlator = EchoCorrelator::default();
        let handles: Vec<_> = (0..5)
            .map(|i| correlator.register(ApiCall::new(format!("action_{i}")), None).1)
            .collect();

        assert_eq!(correlator.fail_all(CallError::ConnectionClosed), 5);
        for handle in handles {
            assert!(matches!(handle.wait().await, Err(CallError::ConnectionClosed)));
        }
        assert_eq!(*correlator.watch_pending().borrow(), 0);
    }

    #[tokio::test]
    async fn test_fail_single_call() {
        let correlator = EchoCorrelator::default();
        let (call, handle) = correlator.register(ApiCall::new("send_msg"), None);
        let echo = call.echo.unwrap();
        assert!(correlator.fail(&echo, CallError::InvalidResponse("bad".into())));
        assert!(!correlator.fail(&echo, CallError::ConnectionClosed));
        assert!(matches!(handle.wait().await, Err(CallError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_dropping_handle_cancels_call() {
        let correlator = EchoCorrelator::default();
        let (call, handle) = correlator.register(ApiCall::new("send_msg"), None);
        drop(handle);
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(response(&call.echo.unwrap(), json!({}))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_get_unique_tokens() {
        let correlator = EchoCorrelator::default();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let correlator = correlator.clone();
                tokio::spawn(async move {
                    (0..100)
                        .map(|_| correlator.register(ApiCall::new("ping"), None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut echoes = HashSet::new();
        let mut handles = Vec::new();
        for task in tasks {
            for (call, handle) in task.await.unwrap() {
                assert!(echoes.insert(call.echo.unwrap()));
                handles.push(handle);
            }
        }
        assert_eq!(echoes.len(), 800);
        assert_eq!(correlator.pending_count(), 800);
    }
}
