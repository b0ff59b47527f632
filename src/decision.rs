//! Human decisions about nested archives.
//!
//! When an archive unpacks into several further archives the mover may ask
//! which of them to keep. Requests are correlated by id in a pending table;
//! an entry is removed when it is answered, when it times out and when the
//! asking task goes away, so the table never grows past the number of
//! in-flight questions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::events::{Event, EventBus};

/// Answer to a nested-archive question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedDecision {
    /// Unpack every nested archive.
    All,
    /// Unpack only the first nested archive.
    First,
    /// Unpack none of them.
    Skip,
    /// Unpack exactly these archives; an empty list behaves like `Skip`.
    Selected(Vec<PathBuf>),
}

impl NestedDecision {
    /// Applies the decision to the discovered archives, preserving their order.
    ///
    /// Selected paths that were not offered are ignored.
    pub fn select(&self, archives: &[PathBuf]) -> Vec<PathBuf> {
        match self {
            NestedDecision::All => archives.to_vec(),
            NestedDecision::First => archives.iter().take(1).cloned().collect(),
            NestedDecision::Skip => Vec::new(),
            NestedDecision::Selected(chosen) => archives
                .iter()
                .filter(|a| chosen.contains(a))
                .cloned()
                .collect(),
        }
    }
}

/// A question published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedArchiveRequest {
    pub request_id: Uuid,
    pub archives: Vec<PathBuf>,
}

type PendingMap = HashMap<Uuid, oneshot::Sender<NestedDecision>>;

/// Correlation table between outstanding questions and their answers.
#[derive(Debug, Clone)]
pub struct DecisionBroker {
    pending: Arc<Mutex<PendingMap>>,
    events: EventBus,
    timeout: Duration,
}

impl DecisionBroker {
    pub fn new(events: EventBus, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            timeout,
        }
    }

    /// Asks observers which nested archives to unpack.
    ///
    /// Publishes [`Event::DecisionRequested`] and waits for [`resolve`](Self::resolve).
    /// If no answer arrives within the timeout every archive is kept.
    pub async fn request(&self, archives: Vec<PathBuf>) -> NestedDecision {
        self.request_with_default(archives, NestedDecision::All).await
    }

    /// Like [`request`](Self::request), answering `fallback` when nobody does.
    ///
    /// The pending entry is removed however the wait ends, including when the
    /// calling future is dropped.
    pub async fn request_with_default(
        &self,
        archives: Vec<PathBuf>,
        fallback: NestedDecision,
    ) -> NestedDecision {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id, tx);
        let _pending = PendingGuard {
            broker: self,
            request_id,
        };

        self.events.info(format!(
            "Waiting for a decision on {} nested archives (request {})",
            archives.len(),
            request_id
        ));
        self.events
            .emit(Event::DecisionRequested(NestedArchiveRequest {
                request_id,
                archives,
            }));

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => {
                self.events
                    .info(format!("Nested archive decision {}: {:?}", request_id, decision));
                decision
            }
            Ok(Err(_)) | Err(_) => {
                self.events.warn(format!(
                    "No nested archive decision for {}, using {:?}",
                    request_id, fallback
                ));
                fallback
            }
        }
    }

    /// Answers a pending request. Returns false if it is unknown or already closed.
    pub fn resolve(&self, request_id: Uuid, decision: NestedDecision) -> bool {
        match self.lock().remove(&request_id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// How long a request waits before falling back.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of questions still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes a request's pending entry when its wait ends.
struct PendingGuard<'a> {
    broker: &'a DecisionBroker,
    request_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.broker.lock().remove(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_select() {
        let archives = paths(&["a.zip", "b.zip", "c.zip"]);

        assert_eq!(NestedDecision::All.select(&archives), archives);
        assert_eq!(NestedDecision::First.select(&archives), paths(&["a.zip"]));
        assert!(NestedDecision::Skip.select(&archives).is_empty());
        assert_eq!(
            NestedDecision::Selected(paths(&["c.zip", "x.zip", "a.zip"])).select(&archives),
            paths(&["a.zip", "c.zip"])
        );
        assert!(NestedDecision::Selected(vec![]).select(&archives).is_empty());
    }

    #[tokio::test]
    async fn test_request_resolved_by_observer() {
        let events = EventBus::new();
        let broker = DecisionBroker::new(events.clone(), Duration::from_secs(5));
        let mut rx = events.subscribe();

        let answering = broker.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Event::DecisionRequested(req) = event {
                    assert_eq!(req.archives.len(), 2);
                    assert!(answering.resolve(req.request_id, NestedDecision::First));
                    break;
                }
            }
        });

        let decision = broker.request(paths(&["a.zip", "b.zip"])).await;
        assert_eq!(decision, NestedDecision::First);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_to_all() {
        let broker = DecisionBroker::new(EventBus::new(), Duration::from_secs(30));

        let decision = broker.request(paths(&["a.zip", "b.zip"])).await;

        assert_eq!(decision, NestedDecision::All);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_with_default_times_out_to_fallback() {
        let broker = DecisionBroker::new(EventBus::new(), Duration::from_secs(30));

        let decision = broker
            .request_with_default(paths(&["a.zip", "b.zip"]), NestedDecision::First)
            .await;

        assert_eq!(decision, NestedDecision::First);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_leaves_no_pending_entry() {
        let events = EventBus::new();
        let broker = DecisionBroker::new(events.clone(), Duration::from_secs(60));
        let mut rx = events.subscribe();

        let asking = broker.clone();
        let handle = tokio::spawn(async move { asking.request(paths(&["a.zip", "b.zip"])).await });
        loop {
            if let Ok(Event::DecisionRequested(_)) = rx.recv().await {
                break;
            }
        }
        assert_eq!(broker.pending_count(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(broker.pending_count(), 0);
    }

    #[test]
    fn test_resolve_unknown_request() {
        let broker = DecisionBroker::new(EventBus::new(), Duration::from_secs(1));
        assert!(!broker.resolve(Uuid::new_v4(), NestedDecision::Skip));
    }
}
