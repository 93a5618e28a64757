//! The GUI model: states, their actions, and observed transitions.
//!
//! States and transitions live in arenas indexed by their ids and are never
//! removed. Lookups by key, by triple, and by action go through side indices
//! kept in sync on insertion.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use tracing::debug;

use crate::action::{Action, ActionId, ActionType, ResolvedAction};
use crate::activity::ActivityNode;
use crate::path::{DestinationFilter, PathFilter, Subsequence};
use crate::snapshot::{GuiSnapshot, StateKey};
use crate::state::State;
use crate::transition::StateTransition;

pub type StateId = u32;
pub type TransitionId = u32;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown state s{0}")]
    UnknownState(StateId),
    #[error("unknown action a{0}")]
    UnknownAction(ActionId),
    #[error("unknown transition t{0}")]
    UnknownTransition(TransitionId),
    #[error("action a{action} does not belong to state s{state}")]
    ForeignAction { action: ActionId, state: StateId },
}

#[derive(Debug, Default)]
pub struct Graph {
    states: Vec<State>,
    key_index: HashMap<StateKey, StateId>,
    /// Owning state of every action, indexed by action id.
    action_owner: Vec<StateId>,
    transitions: Vec<StateTransition>,
    triple_index: HashMap<(StateId, ActionId, StateId), TransitionId>,
    out_edges: Vec<Vec<TransitionId>>,
    in_edges: Vec<Vec<TransitionId>>,
    by_action: HashMap<ActionId, Vec<TransitionId>>,
    entry_states: BTreeSet<StateId>,
    met_target_states: BTreeSet<StateId>,
    activities: BTreeMap<String, ActivityNode>,
    name_visits: HashMap<(ActionType, String), u32>,
    name_targets: HashMap<(ActionType, String), BTreeSet<StateId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the state for `key`, creating it on first sight.
    pub fn get_or_create_state(&mut self, key: StateKey) -> StateId {
        if let Some(&id) = self.key_index.get(&key) {
            return id;
        }

        let id = self.states.len() as StateId;
        let first_action = self.action_owner.len() as ActionId;
        let state = State::new(id, key.clone(), first_action);
        self.action_owner
            .extend(std::iter::repeat(id).take(state.actions().len()));
        self.activities
            .entry(key.activity().to_string())
            .or_insert_with(|| ActivityNode::new(key.activity()))
            .states
            .insert(id);
        debug!(state = id, key = %key, actions = state.actions().len(), "new state");

        self.states.push(state);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.key_index.insert(key, id);
        id
    }

    /// Map a snapshot to its state and record the visit.
    pub fn observe(&mut self, snapshot: GuiSnapshot) -> StateId {
        let id = self.get_or_create_state(snapshot.state_key());
        let state = &mut self.states[id as usize];
        state.visited_count += 1;
        if let Some(activity) = self.activities.get_mut(&snapshot.activity) {
            activity.visited_count += 1;
        }
        state.append_snapshot(snapshot);
        id
    }

    /// Record one traversal of `(source, action, target)`.
    ///
    /// Idempotent by triple: the first call creates the edge, every call
    /// increments its visited count.
    pub fn record_transition(
        &mut self,
        source: StateId,
        action: ActionId,
        target: StateId,
    ) -> Result<TransitionId, ModelError> {
        self.check_state(target)?;
        let owner = self.action_owner(action)?;
        if owner != source {
            return Err(ModelError::ForeignAction { action, state: source });
        }

        let triple = (source, action, target);
        let id = match self.triple_index.get(&triple) {
            Some(&id) => {
                self.transitions[id as usize].strength += 1;
                id
            }
            None => {
                let id = self.transitions.len() as TransitionId;
                let siblings = self.by_action.entry(action).or_default();
                for &sibling in siblings.iter() {
                    self.transitions[sibling as usize].strength -= 1;
                }
                siblings.push(id);
                self.transitions
                    .push(StateTransition::new(id, source, action, target));
                self.out_edges[source as usize].push(id);
                self.in_edges[target as usize].push(id);
                self.triple_index.insert(triple, id);
                debug!(transition = id, source, action, target, "new transition");
                id
            }
        };
        self.transitions[id as usize].visited_count += 1;

        let name_key = self.states[source as usize]
            .action_mut(action)
            .and_then(|a| {
                a.visited_count += 1;
                a.name_key()
            });
        if let Some(name_key) = name_key {
            *self.name_visits.entry(name_key.clone()).or_insert(0) += 1;
            self.name_targets.entry(name_key).or_default().insert(target);
        }
        Ok(id)
    }

    /// Attribute a target hit to `transition`.
    pub fn record_target_hit(&mut self, transition: TransitionId) -> Result<(), ModelError> {
        let edge = self
            .transitions
            .get_mut(transition as usize)
            .ok_or(ModelError::UnknownTransition(transition))?;
        edge.met_target_count += 1;
        let source = edge.source;
        if self.met_target_states.insert(source) {
            debug!(state = source, transition, "state observed a target hit");
        }
        Ok(())
    }

    pub fn add_entry_state(&mut self, state: StateId) -> Result<(), ModelError> {
        self.check_state(state)?;
        self.entry_states.insert(state);
        Ok(())
    }

    pub fn is_entry_state(&self, state: StateId) -> bool {
        self.entry_states.contains(&state)
    }

    pub fn entry_states(&self) -> &BTreeSet<StateId> {
        &self.entry_states
    }

    pub fn met_target_states(&self) -> &BTreeSet<StateId> {
        &self.met_target_states
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.get(id as usize)
    }

    pub fn state_by_key(&self, key: &StateKey) -> Option<&State> {
        self.key_index.get(key).and_then(|&id| self.state(id))
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        let owner = *self.action_owner.get(id as usize)?;
        self.states[owner as usize].action(id)
    }

    pub fn action_owner(&self, id: ActionId) -> Result<StateId, ModelError> {
        self.action_owner
            .get(id as usize)
            .copied()
            .ok_or(ModelError::UnknownAction(id))
    }

    pub fn set_action_valid(&mut self, id: ActionId, valid: bool) -> Result<(), ModelError> {
        let owner = self.action_owner(id)?;
        let action = self.states[owner as usize]
            .action_mut(id)
            .ok_or(ModelError::UnknownAction(id))?;
        action.valid = valid;
        Ok(())
    }

    /// Bind an action to a concrete node of its state's latest snapshot.
    /// `Ok(None)` when no matching node is on screen.
    pub fn resolve_action<R: Rng>(
        &mut self,
        id: ActionId,
        rng: &mut R,
        throttle_millis: u64,
    ) -> Result<Option<ResolvedAction>, ModelError> {
        let owner = self.action_owner(id)?;
        Ok(self.states[owner as usize].resolve_action(id, rng, throttle_millis))
    }

    pub fn transition(&self, id: TransitionId) -> Option<&StateTransition> {
        self.transitions.get(id as usize)
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn find_transition(
        &self,
        source: StateId,
        action: ActionId,
        target: StateId,
    ) -> Option<&StateTransition> {
        self.triple_index
            .get(&(source, action, target))
            .and_then(|&id| self.transition(id))
    }

    pub fn out_transitions(&self, state: StateId) -> impl Iterator<Item = &StateTransition> {
        self.edge_list(self.out_edges.get(state as usize))
    }

    pub fn in_transitions(&self, state: StateId) -> impl Iterator<Item = &StateTransition> {
        self.edge_list(self.in_edges.get(state as usize))
    }

    pub fn action_transitions(&self, action: ActionId) -> impl Iterator<Item = &StateTransition> {
        self.edge_list(self.by_action.get(&action))
    }

    fn edge_list<'a>(
        &'a self,
        ids: Option<&'a Vec<TransitionId>>,
    ) -> impl Iterator<Item = &'a StateTransition> + 'a {
        ids.into_iter()
            .flatten()
            .filter_map(move |&id| self.transitions.get(id as usize))
    }

    pub fn activities(&self) -> impl Iterator<Item = &ActivityNode> {
        self.activities.values()
    }

    pub fn activity(&self, name: &str) -> Option<&ActivityNode> {
        self.activities.get(name)
    }

    /// The single state every recorded traversal of this action's
    /// `(type, widget)` name has led to, if there is exactly one.
    pub fn name_global_target(&self, action: &Action) -> Option<StateId> {
        let targets = self.name_targets.get(&action.name_key()?)?;
        if targets.len() == 1 {
            targets.iter().next().copied()
        } else {
            None
        }
    }

    /// True when no state has exercised this action's `(type, widget)` name.
    pub fn is_action_unvisited_by_name(&self, action: &Action) -> bool {
        match action.name_key() {
            Some(key) => self.name_visits.get(&key).copied().unwrap_or(0) == 0,
            None => action.is_unvisited(),
        }
    }

    /// All shortest paths from `start` accepted by `filter`, at most
    /// `max_len` edges long.
    ///
    /// Level-wise BFS. A path never reuses a transition, and a state first
    /// reached at a shallower level is not re-entered deeper. Every path
    /// tied at the minimal accepted length is returned.
    pub fn find_shortest_paths(
        &self,
        start: StateId,
        filter: &dyn PathFilter,
        max_len: usize,
    ) -> Vec<Subsequence> {
        if self.state(start).is_none() {
            return Vec::new();
        }

        let mut depth_of: HashMap<StateId, usize> = HashMap::new();
        depth_of.insert(start, 0);
        let mut frontier = vec![Subsequence::new(start)];

        for depth in 1..=max_len {
            let mut next = Vec::new();
            for path in &frontier {
                for edge in self.out_transitions(path.last_state()) {
                    if path.contains_transition(edge.id) {
                        continue;
                    }
                    if matches!(depth_of.get(&edge.target), Some(&d) if d < depth) {
                        continue;
                    }
                    if !filter.extend(self, path, edge) {
                        continue;
                    }
                    next.push(path.extended(edge));
                }
            }
            if next.is_empty() {
                break;
            }
            for path in &next {
                depth_of.entry(path.last_state()).or_insert(depth);
            }

            let found: Vec<Subsequence> = next
                .iter()
                .filter(|p| filter.include(self, p))
                .cloned()
                .collect();
            if !found.is_empty() {
                return found;
            }
            frontier = next;
        }
        Vec::new()
    }

    /// Shortest strong paths from `from` to `to`.
    pub fn move_to_state(
        &self,
        from: StateId,
        to: StateId,
        include_back: bool,
        max_len: usize,
    ) -> Vec<Subsequence> {
        let filter = DestinationFilter {
            destination: to,
            include_back,
        };
        self.find_shortest_paths(from, &filter, max_len)
    }

    fn check_state(&self, id: StateId) -> Result<(), ModelError> {
        if (id as usize) < self.states.len() {
            Ok(())
        } else {
            Err(ModelError::UnknownState(id))
        }
    }
}
