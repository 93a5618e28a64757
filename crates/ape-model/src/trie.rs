//! Prefix tree over the transitions taken since the last target hit.
//!
//! The position pointer starts at the root each episode. Every executed
//! transition moves it one level down; a target hit bumps the count of the
//! node it stopped on and sends it back to the root. Counts never decrease,
//! so sequences that keep ending in hits become recognizable as explored.

use std::collections::BTreeMap;

use tracing::trace;

use crate::graph::{StateId, TransitionId};
use crate::transition::StateTransition;

/// Highest reject ratio a single edge can accumulate.
pub const MAX_REJECT_RATIO: f64 = 0.99;

const MIN_COUNT_LIMIT: u32 = 3;

pub type TrieNodeId = usize;

const ROOT: TrieNodeId = 0;

#[derive(Debug, thiserror::Error)]
pub enum TrieError {
    #[error("trie consistency: position ends at s{expected} but transition t{transition} leaves s{found}")]
    Consistency {
        expected: StateId,
        found: StateId,
        transition: TransitionId,
    },
}

#[derive(Debug, Clone)]
struct TrieNode {
    /// Edge leading here from the parent; `None` only at the root.
    edge: Option<(TransitionId, StateId, StateId)>,
    count: u32,
    depth: usize,
    children: BTreeMap<TransitionId, TrieNodeId>,
}

impl TrieNode {
    fn root() -> Self {
        Self {
            edge: None,
            count: 0,
            depth: 0,
            children: BTreeMap::new(),
        }
    }

    fn source(&self) -> Option<StateId> {
        self.edge.map(|(_, source, _)| source)
    }

    fn target(&self) -> Option<StateId> {
        self.edge.map(|(_, _, target)| target)
    }
}

#[derive(Debug, Clone)]
pub struct SubsequenceTrie {
    nodes: Vec<TrieNode>,
    current: TrieNodeId,
    observing_seq_length: usize,
    seq_count_limit_ratio: f64,
    split_count: u32,
    advance_count: u64,
}

impl SubsequenceTrie {
    pub fn new(observing_seq_length: usize, seq_count_limit_ratio: f64) -> Self {
        Self {
            nodes: vec![TrieNode::root()],
            current: ROOT,
            observing_seq_length,
            seq_count_limit_ratio,
            split_count: 0,
            advance_count: 0,
        }
    }

    /// Move the pointer along `transition`, creating the child if needed.
    pub fn advance(&mut self, transition: &StateTransition) -> Result<(), TrieError> {
        if let Some(expected) = self.nodes[self.current].target() {
            if expected != transition.source {
                return Err(TrieError::Consistency {
                    expected,
                    found: transition.source,
                    transition: transition.id,
                });
            }
        }

        let child = match self.nodes[self.current].children.get(&transition.id) {
            Some(&child) => child,
            None => {
                let child = self.nodes.len();
                let depth = self.nodes[self.current].depth + 1;
                self.nodes.push(TrieNode {
                    edge: Some((transition.id, transition.source, transition.target)),
                    count: 0,
                    depth,
                    children: BTreeMap::new(),
                });
                self.nodes[self.current]
                    .children
                    .insert(transition.id, child);
                child
            }
        };
        self.current = child;
        self.advance_count += 1;
        Ok(())
    }

    /// Close the current sequence. On a hit the node at the current
    /// position is counted; the pointer always returns to the root.
    pub fn record_target_hit(&mut self, hit: bool) {
        if hit && self.current != ROOT {
            self.nodes[self.current].count += 1;
            self.split_count += 1;
            trace!(
                depth = self.nodes[self.current].depth,
                count = self.nodes[self.current].count,
                "trie split"
            );
        }
        self.current = ROOT;
    }

    /// Count threshold beyond which a sequence counts as explored.
    pub fn count_limit(&self) -> u32 {
        let scaled = (self.split_count as f64 * self.seq_count_limit_ratio) as u32;
        scaled.max(MIN_COUNT_LIMIT)
    }

    /// Whether taking `transition` next still yields new information.
    pub fn check_next_transition(&self, transition: TransitionId) -> bool {
        let node = &self.nodes[self.current];
        if node.depth >= self.observing_seq_length {
            return true;
        }
        match node.children.get(&transition) {
            None => true,
            Some(&child) => self.nodes[child].count < self.count_limit(),
        }
    }

    /// Per-edge reject ratios for the edges leaving `state` that continue
    /// the current position.
    ///
    /// For each such child, the subtree is walked (bounded by the observing
    /// length); the first node on each branch whose count exceeds
    /// `count_limit` contributes the probability of reaching it from the
    /// child times `1 - 1/(count + 1)`. `probability` gives the chance of
    /// taking a transition from its source state.
    pub fn rejection_ratios<F>(
        &self,
        state: StateId,
        count_limit: u32,
        mut probability: F,
    ) -> BTreeMap<TransitionId, f64>
    where
        F: FnMut(TransitionId) -> f64,
    {
        let mut ratios = BTreeMap::new();
        let current = &self.nodes[self.current];

        for (&transition, &child) in &current.children {
            if self.nodes[child].source() != Some(state) {
                continue;
            }

            let mut reject = 0.0;
            let mut stack = vec![(child, 1.0_f64)];
            while let Some((node_id, reach)) = stack.pop() {
                let node = &self.nodes[node_id];
                if node.count > count_limit {
                    reject += reach * dup_count_to_reject_ratio(node.count);
                    continue;
                }
                if node.depth - current.depth >= self.observing_seq_length {
                    continue;
                }
                for (&next, &grandchild) in &node.children {
                    let p = probability(next);
                    if p > 0.0 {
                        stack.push((grandchild, reach * p));
                    }
                }
            }

            if reject > 0.0 {
                ratios.insert(transition, reject.min(MAX_REJECT_RATIO));
            }
        }
        ratios
    }

    /// Leave the current sequence without recording anything.
    pub fn reset_position(&mut self) {
        self.current = ROOT;
    }

    pub fn is_at_root(&self) -> bool {
        self.current == ROOT
    }

    pub fn depth(&self) -> usize {
        self.nodes[self.current].depth
    }

    pub fn current_count(&self) -> u32 {
        self.nodes[self.current].count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn split_count(&self) -> u32 {
        self.split_count
    }

    pub fn advance_count(&self) -> u64 {
        self.advance_count
    }

    /// Count stored at the node reached from the root by `path`.
    pub fn count_for_path(&self, path: &[TransitionId]) -> Option<u32> {
        let mut node = ROOT;
        for transition in path {
            node = *self.nodes[node].children.get(transition)?;
        }
        Some(self.nodes[node].count)
    }
}

/// `1 - 1/(count + 1)`: grows toward 1 as a sequence keeps repeating.
pub fn dup_count_to_reject_ratio(count: u32) -> f64 {
    1.0 - 1.0 / (count as f64 + 1.0)
}
