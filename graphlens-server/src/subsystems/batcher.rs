//! Per-tab notification batching.
//!
//! One shared deadline covers every pending tab. It is armed by the first
//! message queued after a flush and is not pushed back by later messages, so
//! nothing waits longer than one window.

use std::collections::BTreeMap;
use std::time::Duration;

use graphlens_core::config::BatchingConfig;
use graphlens_core::{PanelMessage, TabId};
use tokio::time::Instant;

pub struct Batcher {
    window: Duration,
    queues: BTreeMap<TabId, Vec<PanelMessage>>,
    deadline: Option<Instant>,
}

impl Batcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            queues: BTreeMap::new(),
            deadline: None,
        }
    }

    pub fn from_config(config: &BatchingConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.window()))
    }

    pub fn enqueue(&mut self, tab_id: TabId, message: PanelMessage, now: Instant) {
        self.queues.entry(tab_id).or_default().push(message);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Take every pending tab's messages, coalesced into `_batch` messages.
    pub fn drain(&mut self) -> Vec<(TabId, Vec<PanelMessage>)> {
        self.deadline = None;
        std::mem::take(&mut self.queues)
            .into_iter()
            .map(|(tab_id, messages)| (tab_id, PanelMessage::coalesce(messages)))
            .collect()
    }

    /// Drop a tab's pending messages. Returns how many were dropped.
    pub fn discard(&mut self, tab_id: TabId) -> usize {
        let dropped = self.queues.remove(&tab_id).map(|q| q.len()).unwrap_or(0);
        if self.queues.is_empty() {
            self.deadline = None;
        }
        dropped
    }

    pub fn pending(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphlens_core::{CapturedExchange, Completion};

    fn request(id: &str, tab: TabId) -> PanelMessage {
        PanelMessage::GraphqlRequest(CapturedExchange::pending(id, tab, "https://x.test/graphql"))
    }

    #[test]
    fn test_deadline_is_not_pushed_back() {
        let mut batcher = Batcher::new(Duration::from_millis(100));
        let start = Instant::now();
        batcher.enqueue(1, request("a", 1), start);
        batcher.enqueue(1, request("b", 1), start + Duration::from_millis(60));
        batcher.enqueue(2, request("c", 2), start + Duration::from_millis(90));

        assert_eq!(batcher.deadline(), Some(start + Duration::from_millis(100)));
        assert!(!batcher.is_due(start + Duration::from_millis(99)));
        assert!(batcher.is_due(start + Duration::from_millis(100)));
    }

    #[test]
    fn test_drain_coalesces_per_tab_without_loss() {
        let mut batcher = Batcher::new(Duration::from_millis(100));
        let now = Instant::now();
        batcher.enqueue(1, request("a", 1), now);
        batcher.enqueue(1, PanelMessage::RequestCompleted(Completion::from_http("a", 200)), now);
        batcher.enqueue(1, request("b", 1), now);
        batcher.enqueue(2, request("c", 2), now);
        assert_eq!(batcher.pending(), 4);

        let drained = batcher.drain();
        assert_eq!(drained.len(), 2);
        let (tab, messages) = &drained[0];
        assert_eq!(*tab, 1);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            PanelMessage::GraphqlRequestBatch(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(messages[1].type_name(), "request-completed_batch");
        assert_eq!(batcher.pending(), 0);
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn test_discard_clears_deadline_when_empty() {
        let mut batcher = Batcher::new(Duration::from_millis(100));
        batcher.enqueue(4, request("a", 4), Instant::now());
        assert_eq!(batcher.discard(4), 1);
        assert!(batcher.deadline().is_none());
    }
}
