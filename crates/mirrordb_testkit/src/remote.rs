//! A scripted remote.

use mirrordb_core::SequenceNumber;
use mirrordb_engine::{RemoteError, RemoteSync};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One call into the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    /// `fetch_full_snapshot`.
    FullSnapshot,
    /// `fetch_since(marker)`.
    Since(SequenceNumber),
}

#[derive(Debug)]
struct RemoteState {
    head: SequenceNumber,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    latency: Option<Duration>,
}

/// A remote that answers every fetch with its current head position.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct ScriptedRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ScriptedRemote {
    /// Creates a remote whose head is at `head`.
    pub fn new(head: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                head: SequenceNumber::new(head),
                calls: Vec::new(),
                failures: VecDeque::new(),
                latency: None,
            })),
        }
    }

    /// Delays every response.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    /// Moves the head.
    pub fn set_head(&self, head: u64) {
        self.state.lock().head = SequenceNumber::new(head);
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Number of full snapshot fetches.
    pub fn full_snapshots(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RemoteCall::FullSnapshot))
            .count()
    }

    /// Markers passed to `fetch_since`.
    pub fn since_calls(&self) -> Vec<SequenceNumber> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Since(marker) => Some(marker),
                RemoteCall::FullSnapshot => None,
            })
            .collect()
    }

    async fn answer(&self, call: RemoteCall) -> Result<SequenceNumber, RemoteError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.head),
        }
    }
}

impl RemoteSync for ScriptedRemote {
    async fn fetch_full_snapshot(&self) -> Result<SequenceNumber, RemoteError> {
        self.answer(RemoteCall::FullSnapshot).await
    }

    async fn fetch_since(&self, marker: SequenceNumber) -> Result<SequenceNumber, RemoteError> {
        self.answer(RemoteCall::Since(marker)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_with_head_and_records_calls() {
        let remote = ScriptedRemote::new(10);
        assert_eq!(remote.fetch_full_snapshot().await.unwrap(), SequenceNumber::new(10));
        remote.set_head(12);
        assert_eq!(
            remote.fetch_since(SequenceNumber::new(10)).await.unwrap(),
            SequenceNumber::new(12)
        );
        assert_eq!(remote.full_snapshots(), 1);
        assert_eq!(remote.since_calls(), vec![SequenceNumber::new(10)]);
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let remote = ScriptedRemote::new(1);
        remote.fail_next(RemoteError::Unavailable("offline".into()));
        assert!(remote.fetch_full_snapshot().await.is_err());
        assert!(remote.fetch_full_snapshot().await.is_ok());
    }
}
