//! Suppresses title requests that were already forwarded.
//!
//! Each device loop owns its own `Deduplicator`; nothing here is global.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::parse::CandidateEvent;

/// How long accepted events are remembered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every accepted event, for the life of the process.
    #[default]
    Unbounded,
    /// Only the last N accepted events; oldest evicted first.
    Window(usize),
}

#[derive(Debug)]
pub struct Deduplicator {
    policy: DedupPolicy,
    seen: HashSet<String>,
    /// Insertion order, only kept for the window policy.
    order: VecDeque<String>,
}

impl Deduplicator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Returns true the first time an event is seen (it should be forwarded),
    /// false while it is remembered.
    pub fn accept(&mut self, event: &CandidateEvent) -> bool {
        let key = event.key();
        if self.seen.contains(&key) {
            return false;
        }

        match self.policy {
            DedupPolicy::Unbounded => {
                self.seen.insert(key);
            }
            DedupPolicy::Window(0) => {}
            DedupPolicy::Window(n) => {
                if self.order.len() == n {
                    if let Some(oldest) = self.order.pop_front() {
                        self.seen.remove(&oldest);
                    }
                }
                self.seen.insert(key.clone());
                self.order.push_back(key);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
