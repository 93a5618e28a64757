//! The ordered selection stages.
//!
//! Each stage either yields an action for the current state or passes.
//! [`StatefulAgent::plan`] lists the stages for the agent's variant and mode;
//! the driver runs them in order and takes the first action produced.

use std::collections::{BTreeSet, HashSet, VecDeque};

use ape_model::{pick_weighted, ActionFilter, ActionId, ModelError, StateId, TransitionId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::StatefulAgent;
use crate::config::AgentVariant;
use crate::error::AgentError;
use crate::filters::{
    greedy_actions, is_greedy_state, random_pick_shortest, BacktrackPathFilter, GreedyPathFilter,
    TrivialActivityPathFilter,
};
use crate::scoring::score_states;
use crate::target::{TargetChoice, TargetContext};
use crate::trivial::collect_trivial_activities;

/// Incoming edge count above which a state with greedy work counts as a
/// dialog hub.
const DIALOG_IN_EDGES: usize = 5;

/// Selection stages plus the bookkeeping events counted alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    TrivialActivity,
    SaturatedState,
    UseBuffer,
    EarlyStage,
    Target,
    EpsilonGreedy,
    Null,
    BufferLoss,
    FillBuffer,
    BadState,
}

impl AgentEvent {
    pub const ALL: [AgentEvent; 10] = [
        AgentEvent::TrivialActivity,
        AgentEvent::SaturatedState,
        AgentEvent::UseBuffer,
        AgentEvent::EarlyStage,
        AgentEvent::Target,
        AgentEvent::EpsilonGreedy,
        AgentEvent::Null,
        AgentEvent::BufferLoss,
        AgentEvent::FillBuffer,
        AgentEvent::BadState,
    ];
}

impl std::fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentEvent::TrivialActivity => "TRIVIAL_ACTIVITY",
            AgentEvent::SaturatedState => "SATURATED_STATE",
            AgentEvent::UseBuffer => "USE_BUFFER",
            AgentEvent::EarlyStage => "EARLY_STAGE",
            AgentEvent::Target => "TARGET",
            AgentEvent::EpsilonGreedy => "EPSILON_GREEDY",
            AgentEvent::Null => "NULL",
            AgentEvent::BufferLoss => "BUFFER_LOSS",
            AgentEvent::FillBuffer => "FILL_BUFFER",
            AgentEvent::BadState => "BAD_STATE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventCounters {
    counts: [u64; AgentEvent::ALL.len()],
}

impl EventCounters {
    pub fn record(&mut self, event: AgentEvent) {
        self.counts[event as usize] += 1;
    }

    pub fn get(&self, event: AgentEvent) -> u64 {
        self.counts[event as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentEvent, u64)> + '_ {
        AgentEvent::ALL.iter().map(|&e| (e, self.get(e)))
    }
}

pub(crate) type StageFn = fn(&mut StatefulAgent, StateId) -> Result<Option<ActionId>, AgentError>;

pub(crate) struct Stage {
    pub kind: AgentEvent,
    pub run: StageFn,
}

const fn stage(kind: AgentEvent, run: StageFn) -> Stage {
    Stage { kind, run }
}

impl StatefulAgent {
    pub(crate) fn plan(&self) -> Vec<Stage> {
        let mut plan = vec![
            stage(AgentEvent::UseBuffer, Self::stage_buffer),
            stage(AgentEvent::TrivialActivity, Self::stage_back_to_activity),
        ];
        let exploring = match self.config.variant {
            AgentVariant::Target => {
                plan.push(stage(AgentEvent::Target, Self::stage_target));
                true
            }
            AgentVariant::Sata => {
                if self.target_mode && !self.graph.met_target_states().is_empty() {
                    plan.push(stage(AgentEvent::Target, Self::stage_target_sata));
                    false
                } else {
                    true
                }
            }
        };
        if exploring {
            plan.extend([
                stage(AgentEvent::EarlyStage, Self::stage_early_forward),
                stage(AgentEvent::TrivialActivity, Self::stage_trivial_activity),
                stage(AgentEvent::SaturatedState, Self::stage_saturated_backtrack),
                stage(AgentEvent::EarlyStage, Self::stage_backward),
            ]);
        }
        plan.extend([
            stage(AgentEvent::EpsilonGreedy, Self::stage_epsilon_greedy),
            stage(AgentEvent::Null, Self::stage_null),
        ]);
        plan
    }

    /// Queue the rest of `edges` and return the first action.
    pub(crate) fn refill_buffer(&mut self, edges: &[TransitionId]) -> Result<Option<ActionId>, AgentError> {
        let Some((&first, rest)) = edges.split_first() else {
            return Ok(None);
        };
        let edge = self
            .graph
            .transition(first)
            .ok_or(ModelError::UnknownTransition(first))?;
        self.buffer = rest.iter().copied().collect();
        self.counters.record(AgentEvent::FillBuffer);
        debug!(steps = edges.len(), "buffer refilled");
        Ok(Some(edge.action))
    }

    fn stage_buffer(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        let Some(&next) = self.buffer.front() else {
            return Ok(None);
        };
        let edge = self
            .graph
            .transition(next)
            .ok_or(ModelError::UnknownTransition(next))?;
        if edge.source != state {
            debug!(expected = edge.source, actual = state, "buffer lost");
            self.buffer.clear();
            self.counters.record(AgentEvent::BufferLoss);
            return Ok(None);
        }
        let action = edge.action;
        self.buffer.pop_front();
        Ok(Some(action))
    }

    /// Keep pressing back until the remembered trivial activity is on top.
    fn stage_back_to_activity(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        let Some(activity) = self.back_to_activity.clone() else {
            return Ok(None);
        };
        let position = self.activity_stack.iter().rposition(|a| *a == activity);
        match position {
            Some(index) if index != 0 && self.activity_stack.len() > 1 => {
                let current = self.state_ref(state)?;
                if current.is_back_enabled() {
                    debug!(activity = %activity, depth = index, "backtracking to trivial activity");
                    return Ok(Some(current.back_action().id));
                }
                Ok(None)
            }
            _ => {
                self.back_to_activity = None;
                Ok(None)
            }
        }
    }

    fn stage_target(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if self.target_mode && self.early_stage_buffer == 0 {
            if let Some(action) = self.select_toward_target(state)? {
                return Ok(Some(action));
            }
            self.last_chosen = None;
        }
        if self.early_stage_buffer > 0 {
            self.early_stage_buffer -= 1;
        }
        Ok(None)
    }

    fn stage_target_sata(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        self.select_toward_target(state)
    }

    pub(crate) fn select_toward_target(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if self.graph.met_target_states().is_empty() {
            return Ok(None);
        }
        let scores = score_states(&self.graph, self.stability.score_ratio())?;
        let failure_buffer = self.config.early_stage.failure_buffer;
        if !scores.contains_key(&state) {
            warn!(state, "no path from the current state to any target state");
            self.early_stage_buffer += failure_buffer;
            self.stability.record_strategy_failure();
            return Ok(None);
        }

        let ctx = TargetContext {
            graph: &self.graph,
            trie: &self.trie,
            state,
            scores: &scores,
            met_target_weight: self.config.met_target_weight,
            reject_scale: self.stability.reject_scale(),
            count_limit: self.trie.count_limit().max(self.config.trie_count_limit),
        };
        let choice = self.selector.select(&ctx, &mut self.rng)?;
        match choice {
            TargetChoice::Chosen(id) => {
                self.stability.record_strategy_success();
                self.last_chosen = Some(id);
                Ok(self.graph.transition(id).map(|t| t.action))
            }
            TargetChoice::NoTransition => {
                warn!(state, selector = self.selector.name(), "no transition toward a target");
                self.early_stage_buffer += failure_buffer;
                self.stability.record_strategy_failure();
                Ok(None)
            }
            TargetChoice::AllRejected => {
                warn!(state, selector = self.selector.name(), "every transition rejected");
                self.early_stage_buffer += failure_buffer;
                Ok(None)
            }
        }
    }

    fn stage_early_forward(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if self.config.toggles.aba {
            if let Some(action) = self.select_aba(state)? {
                return Ok(Some(action));
            }
        }
        self.greedy_forward(state)
    }

    /// From A (the new state) move back to B (the state we just left) when
    /// B is colder, stopping at the coldest greedy state on the way.
    fn select_aba(&mut self, a: StateId) -> Result<Option<ActionId>, AgentError> {
        let Some(b) = self.previous_state else {
            return Ok(None);
        };
        if !self.do_aba(a, b) {
            return Ok(None);
        }
        let max_len = self.config.max_path_length;
        let forward = self.graph.move_to_state(a, b, false, max_len);
        if forward.is_empty() || self.graph.move_to_state(b, a, true, max_len).is_empty() {
            return Ok(None);
        }
        let Some(path) = random_pick_shortest(&mut self.rng, forward) else {
            return Ok(None);
        };

        let mut stop: Option<(usize, StateId)> = None;
        for (i, &id) in path.edges().iter().enumerate() {
            let edge = self
                .graph
                .transition(id)
                .ok_or(ModelError::UnknownTransition(id))?;
            if !self.do_aba(edge.source, edge.target) {
                break;
            }
            if !is_greedy_state(&self.graph, edge.target) {
                continue;
            }
            match stop {
                Some((_, best)) if !self.is_colder(edge.target, best) => {}
                _ => stop = Some((i, edge.target)),
            }
        }
        let Some((index, target)) = stop else {
            return Ok(None);
        };
        debug!(from = a, to = target, steps = index + 1, "ABA move");
        let edges = path.edges()[..=index].to_vec();
        self.refill_buffer(&edges)
    }

    fn do_aba(&self, from: StateId, to: StateId) -> bool {
        if self.is_dialog_state(to) {
            return false;
        }
        self.is_colder(to, from)
    }

    /// Whether `a` has been visited less than `b`, comparing activities when
    /// the states belong to different ones.
    fn is_colder(&self, a: StateId, b: StateId) -> bool {
        let (Some(sa), Some(sb)) = (self.graph.state(a), self.graph.state(b)) else {
            return false;
        };
        if sa.activity() == sb.activity() {
            return sa.visited_count < sb.visited_count;
        }
        let visits = |s: &ape_model::State| {
            self.graph
                .activity(s.activity())
                .map_or(0, |n| n.visited_count)
        };
        visits(sa) < visits(sb)
    }

    fn is_dialog_state(&self, state: StateId) -> bool {
        if self.graph.in_transitions(state).count() <= DIALOG_IN_EDGES {
            return false;
        }
        is_greedy_state(&self.graph, state)
            || !self
                .graph
                .find_shortest_paths(state, &GreedyPathFilter, self.config.max_path_length)
                .is_empty()
    }

    fn greedy_forward(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        let greedy = greedy_actions(&self.graph, state);
        if let Some(action) = pick_weighted(&mut self.rng, &greedy) {
            debug!(action = %action, "greedy action on the current state");
            return Ok(Some(action.id));
        }

        let current = self.state_ref(state)?;
        for action in current.targeted_actions() {
            if !ActionFilter::EnabledValidUnvisited.include(action) {
                continue;
            }
            if let Some(target) = self.graph.name_global_target(action) {
                if is_greedy_state(&self.graph, target) {
                    debug!(action = %action, target, "greedy state via a name-global action");
                    return Ok(Some(action.id));
                }
            }
        }

        let paths = self
            .graph
            .find_shortest_paths(state, &GreedyPathFilter, self.config.max_path_length);
        match random_pick_shortest(&mut self.rng, paths) {
            Some(path) => {
                debug!(target = path.last_state(), steps = path.len(), "path to a greedy state");
                self.refill_buffer(path.edges())
            }
            None => Ok(None),
        }
    }

    fn stage_trivial_activity(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if !self.config.toggles.trivial_activity {
            return Ok(None);
        }
        let trivial =
            collect_trivial_activities(&self.graph, self.config.trivial_activity_rank_threshold);
        if trivial.is_empty() || trivial.contains(self.state_ref(state)?.activity()) {
            return Ok(None);
        }

        let filter = TrivialActivityPathFilter { trivial: &trivial };
        let mut paths = self
            .graph
            .find_shortest_paths(state, &filter, self.config.max_path_length);
        if !paths.is_empty() {
            let index = self.rng.gen_range(0..paths.len());
            let path = paths.swap_remove(index);
            debug!(target = path.last_state(), "path to a trivial activity");
            return self.refill_buffer(path.edges());
        }
        if self.config.toggles.back_to_trivial_activity {
            return self.back_to_trivial_activity(state, &trivial);
        }
        Ok(None)
    }

    /// Start backtracking toward the deepest trivial activity on the stack.
    fn back_to_trivial_activity(
        &mut self,
        state: StateId,
        trivial: &BTreeSet<String>,
    ) -> Result<Option<ActionId>, AgentError> {
        let Some(deepest) = self
            .activity_stack
            .iter()
            .filter(|a| trivial.contains(*a))
            .last()
            .cloned()
        else {
            return Ok(None);
        };
        let current = self.state_ref(state)?;
        if !current.is_back_enabled() {
            return Ok(None);
        }
        let back = current.back_action().id;
        info!(activity = %deepest, "backtracking to trivial activity");
        self.back_to_activity = Some(deepest);
        Ok(Some(back))
    }

    /// On a saturated state, follow strong back edges to the nearest
    /// unsaturated state and move there.
    fn stage_saturated_backtrack(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if !self.state_ref(state)?.is_saturated() {
            return Ok(None);
        }

        let mut queue = VecDeque::from([state]);
        let mut seen = HashSet::from([state]);
        let mut found = None;
        'search: while let Some(current) = queue.pop_front() {
            let back = self.state_ref(current)?.back_action().id;
            for edge in self.graph.action_transitions(back) {
                if edge.is_circle() || !edge.is_strong() {
                    continue;
                }
                let target = self.state_ref(edge.target)?;
                if !target.is_saturated() {
                    found = Some(edge.target);
                    break 'search;
                }
                if seen.insert(edge.target) {
                    queue.push_back(edge.target);
                }
            }
        }

        let Some(target) = found.filter(|&t| t != state) else {
            return Ok(None);
        };
        let paths = self
            .graph
            .move_to_state(state, target, true, self.config.max_path_length);
        match random_pick_shortest(&mut self.rng, paths) {
            Some(path) => {
                debug!(target, "backtracking to an unsaturated state");
                self.refill_buffer(path.edges())
            }
            None => Ok(None),
        }
    }

    fn stage_backward(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        if !self.config.toggles.backward_greedy {
            return Ok(None);
        }
        let back = self.state_ref(state)?.back_action();
        if ActionFilter::EnabledValidUnvisited.include(back) {
            return Ok(Some(back.id));
        }
        let paths = self
            .graph
            .find_shortest_paths(state, &BacktrackPathFilter, self.config.max_path_length);
        match random_pick_shortest(&mut self.rng, paths) {
            Some(path) => {
                debug!(target = path.last_state(), "backtrack path");
                self.refill_buffer(path.edges())
            }
            None => Ok(None),
        }
    }

    fn stage_epsilon_greedy(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        let current = self
            .graph
            .state(state)
            .ok_or(ModelError::UnknownState(state))?;
        let back = current.back_action();
        if back.valid && back.is_unvisited() {
            return Ok(Some(back.id));
        }
        let roll: f64 = self.rng.gen();
        let picked = if roll >= self.config.epsilon {
            current.greedy_pick_least_visited(ActionFilter::EnabledValid)
        } else {
            current.randomly_pick_action(&mut self.rng, ActionFilter::EnabledValid, true)
        };
        Ok(picked.map(|a| a.id))
    }

    fn stage_null(&mut self, state: StateId) -> Result<Option<ActionId>, AgentError> {
        let back = self.state_ref(state)?.back_action();
        Ok(back.valid.then_some(back.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Observation;
    use crate::config::AgentConfig;
    use ape_model::{ActionType, GuiNode, GuiSnapshot, Widget};

    fn screen(activity: &str, widgets: &[&str]) -> Observation {
        let nodes = widgets
            .iter()
            .map(|w| GuiNode {
                widget: Widget::new(*w, &[ActionType::Click]),
                bounds: Default::default(),
            })
            .collect();
        Observation::new(GuiSnapshot::new(activity, nodes))
    }

    #[test]
    fn test_buffer_lost_on_unexpected_state() {
        let mut agent = StatefulAgent::new(AgentConfig::default());
        agent.observe(screen("Main", &["ok"]), false).unwrap();
        agent.select_next_action().unwrap();
        agent.observe(screen("Next", &[]), false).unwrap();

        // Queue the Main -> Next edge while standing on Next.
        agent.buffer.push_back(0);
        agent.select_next_action().unwrap();
        assert_eq!(agent.counters.get(AgentEvent::BufferLoss), 1);
        assert!(agent.buffer.is_empty());
    }

    #[test]
    fn test_buffer_replays_queued_edge() {
        let mut agent = StatefulAgent::new(AgentConfig::default());
        agent.observe(screen("Main", &["ok"]), false).unwrap();
        let first = agent.select_next_action().unwrap();
        agent.observe(screen("Next", &[]), false).unwrap();
        agent.on_process_restart();
        agent.observe(screen("Main", &["ok"]), false).unwrap();

        agent.buffer.push_back(0);
        let replayed = agent.select_next_action().unwrap();
        assert_eq!(replayed.action, first.action);
        assert_eq!(agent.counters.get(AgentEvent::UseBuffer), 1);
    }

    #[test]
    fn test_counters() {
        let mut counters = EventCounters::default();
        counters.record(AgentEvent::Target);
        counters.record(AgentEvent::Target);
        counters.record(AgentEvent::BadState);
        assert_eq!(counters.get(AgentEvent::Target), 2);
        assert_eq!(counters.get(AgentEvent::BadState), 1);
        assert_eq!(counters.iter().count(), AgentEvent::ALL.len());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(AgentEvent::UseBuffer.to_string(), "USE_BUFFER");
        assert_eq!(AgentEvent::EpsilonGreedy.to_string(), "EPSILON_GREEDY");
    }
}
