//! The stateful exploration agent.
//!
//! The driver alternates [`StatefulAgent::observe`] and
//! [`StatefulAgent::select_next_action`]. Observations grow the GUI model and
//! the subsequence trie; selection runs the stage chain for the configured
//! variant and binds the chosen action to a node on screen.

use std::collections::VecDeque;

use ape_model::{
    ActionId, Graph, GuiSnapshot, ModelError, ResolvedAction, State, StateId, StateTransition,
    SubsequenceTrie, TransitionId,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, AgentVariant};
use crate::error::AgentError;
use crate::stability::StabilityTracker;
use crate::stages::{AgentEvent, EventCounters, Stage};
use crate::target::{selector_for, TargetSelector};

/// Extra per-action delay the target variant adds on top of the base
/// throttle.
const TARGET_THROTTLE_MILLIS: u64 = 200;

/// One screen as reported by the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub snapshot: GuiSnapshot,
    /// Activities on the task stack, top first.
    #[serde(default)]
    pub activity_stack: Vec<String>,
}

impl Observation {
    pub fn new(snapshot: GuiSnapshot) -> Self {
        Self {
            snapshot,
            activity_stack: Vec::new(),
        }
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.activity_stack = stack;
        self
    }
}

/// Aggregate counters for a finished or running agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub decisions: u64,
    pub target_hits: u64,
    pub nondeterministic_transitions: u64,
    pub states: usize,
    pub transitions: usize,
    pub trie_nodes: usize,
    pub events: Vec<(AgentEvent, u64)>,
}

pub struct StatefulAgent {
    pub(crate) config: AgentConfig,
    pub(crate) graph: Graph,
    pub(crate) trie: SubsequenceTrie,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) selector: Box<dyn TargetSelector>,
    pub(crate) stability: StabilityTracker,
    pub(crate) counters: EventCounters,
    /// State observed before the current one.
    pub(crate) previous_state: Option<StateId>,
    pub(crate) current_state: Option<StateId>,
    last_action: Option<ActionId>,
    pub(crate) buffer: VecDeque<TransitionId>,
    pub(crate) activity_stack: Vec<String>,
    pub(crate) back_to_activity: Option<String>,
    strategy_change_ready: bool,
    pub(crate) target_mode: bool,
    pub(crate) early_stage_buffer: u32,
    pub(crate) last_chosen: Option<TransitionId>,
    new_episode: bool,
    restart_requested: bool,
    decisions: u64,
    target_hits: u64,
    nondeterministic: u64,
}

impl StatefulAgent {
    pub fn new(config: AgentConfig) -> Self {
        info!(
            variant = ?config.variant,
            seed = config.seed,
            selection = ?config.target_selection,
            "agent created"
        );
        Self {
            graph: Graph::new(),
            trie: SubsequenceTrie::new(config.observing_seq_length, config.seq_count_limit_ratio),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            selector: selector_for(config.target_selection),
            stability: StabilityTracker::new(&config),
            counters: EventCounters::default(),
            previous_state: None,
            current_state: None,
            last_action: None,
            buffer: VecDeque::new(),
            activity_stack: Vec::new(),
            back_to_activity: None,
            strategy_change_ready: false,
            target_mode: false,
            early_stage_buffer: 0,
            last_chosen: None,
            new_episode: true,
            restart_requested: false,
            decisions: 0,
            target_hits: 0,
            nondeterministic: 0,
            config,
        }
    }

    /// Record a new screen. `met_target` reports whether a target method
    /// was hit while the last action executed.
    pub fn observe(&mut self, observation: Observation, met_target: bool) -> Result<StateId, AgentError> {
        let Observation {
            snapshot,
            activity_stack,
        } = observation;
        let state = self.graph.observe(snapshot);
        self.activity_stack = activity_stack;

        let recorded = match (self.current_state, self.last_action) {
            (Some(source), Some(action)) if !self.new_episode => {
                Some(self.record_step(source, action, state)?)
            }
            _ => None,
        };
        if self.new_episode {
            self.graph.add_entry_state(state)?;
            self.new_episode = false;
            debug!(state, "entry state");
        }

        match recorded {
            Some(id) => {
                let edge = self
                    .graph
                    .transition(id)
                    .ok_or(ModelError::UnknownTransition(id))?
                    .clone();
                self.trie.advance(&edge)?;
                if met_target {
                    self.graph.record_target_hit(id)?;
                    self.trie.record_target_hit(true);
                    self.stability.record_hit();
                    self.target_hits += 1;
                    info!(transition = id, source = edge.source, target = edge.target, "target hit");
                } else {
                    self.stability.record_miss();
                    if self.trie.depth() >= self.config.observing_seq_length {
                        self.trie.reset_position();
                    }
                }
            }
            None => {
                self.trie.reset_position();
                if !met_target {
                    self.stability.record_miss();
                }
            }
        }

        self.previous_state = self.current_state;
        self.current_state = Some(state);
        self.last_action = None;
        self.last_chosen = None;
        Ok(state)
    }

    fn record_step(
        &mut self,
        source: StateId,
        action: ActionId,
        target: StateId,
    ) -> Result<TransitionId, AgentError> {
        let chosen = self
            .last_chosen
            .and_then(|id| self.graph.transition(id))
            .map(StateTransition::triple);
        if let Some((from, via, expected)) = chosen {
            if from == source && via == action && expected != target {
                self.nondeterministic += 1;
                warn!(expected, actual = target, action, "non-deterministic transition");
            }
        }
        Ok(self.graph.record_transition(source, action, target)?)
    }

    /// Pick the next action for the current state and bind it to a node.
    pub fn select_next_action(&mut self) -> Result<ResolvedAction, AgentError> {
        let state = self.current_state.ok_or(AgentError::NotStarted)?;
        self.decisions += 1;

        if self.config.variant == AgentVariant::Target {
            if self.target_mode {
                for cause in self.stability.check() {
                    info!(?cause, "restart requested");
                    self.restart_requested = true;
                }
            }
            if self.strategy_change_ready {
                if self.graph.met_target_states().is_empty() {
                    self.early_stage_buffer = self.config.early_stage.missing_target_buffer;
                } else if !self.target_mode {
                    info!(decisions = self.decisions, "target mode activated");
                    self.target_mode = true;
                    self.stability.reset();
                    self.early_stage_buffer = self.config.early_stage.activation_buffer;
                }
            }
        }

        let throttle = self.throttle_millis();
        let attempts = self.state_ref(state)?.actions().len() + 1;
        for _ in 0..attempts {
            let plan = self.plan();
            let (kind, action) = self.run_plan(state, &plan)?;
            match self.graph.resolve_action(action, &mut self.rng, throttle)? {
                Some(resolved) => {
                    self.last_action = Some(action);
                    self.counters.record(kind);
                    debug!(stage = %kind, action, "action selected");
                    return Ok(resolved);
                }
                None => {
                    warn!(action, state, "action has no node on screen");
                    self.graph.set_action_valid(action, false)?;
                    self.buffer.clear();
                    self.last_chosen = None;
                }
            }
        }
        self.counters.record(AgentEvent::BadState);
        Err(AgentError::NoAvailableAction(state))
    }

    fn run_plan(&mut self, state: StateId, plan: &[Stage]) -> Result<(AgentEvent, ActionId), AgentError> {
        for stage in plan {
            if let Some(action) = (stage.run)(self, state)? {
                return Ok((stage.kind, action));
            }
        }
        self.counters.record(AgentEvent::BadState);
        Err(AgentError::NoAvailableAction(state))
    }

    fn throttle_millis(&self) -> u64 {
        match self.config.variant {
            AgentVariant::Target => self.config.base_throttle_millis + TARGET_THROTTLE_MILLIS,
            AgentVariant::Sata => self.config.base_throttle_millis,
        }
    }

    /// Fired by the driver once `target_trigger_steps` decisions have
    /// passed.
    pub fn alert_target_trigger(&mut self) {
        match self.config.variant {
            AgentVariant::Sata => {
                info!("target mode enabled");
                self.target_mode = true;
                self.stability.reset();
            }
            AgentVariant::Target => {
                self.strategy_change_ready = true;
                if !self.graph.met_target_states().is_empty() && !self.target_mode {
                    info!("target mode enabled");
                    self.target_mode = true;
                    self.stability.reset();
                }
            }
        }
    }

    /// The target process was restarted: the next observation opens a new
    /// episode.
    pub fn on_process_restart(&mut self) {
        debug!(decisions = self.decisions, "new episode");
        self.new_episode = true;
        self.trie.reset_position();
        self.buffer.clear();
        self.back_to_activity = None;
        self.activity_stack.clear();
        self.previous_state = None;
        self.current_state = None;
        self.last_action = None;
        self.last_chosen = None;
        self.stability.reset();
    }

    /// Whether stability tracking asked for a restart since the last call.
    pub fn take_restart_request(&mut self) -> bool {
        std::mem::take(&mut self.restart_requested)
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            decisions: self.decisions,
            target_hits: self.target_hits,
            nondeterministic_transitions: self.nondeterministic,
            states: self.graph.state_count(),
            transitions: self.graph.transition_count(),
            trie_nodes: self.trie.node_count(),
            events: self.counters.iter().collect(),
        }
    }

    pub fn tear_down(&self) {
        let stats = self.stats();
        info!(
            decisions = stats.decisions,
            target_hits = stats.target_hits,
            states = stats.states,
            transitions = stats.transitions,
            trie_nodes = stats.trie_nodes,
            "agent finished"
        );
        for (event, count) in stats.events.iter().filter(|(_, c)| *c > 0) {
            info!(event = %event, count, "stage counter");
        }
    }

    pub(crate) fn state_ref(&self, id: StateId) -> Result<&State, AgentError> {
        Ok(self.graph.state(id).ok_or(ModelError::UnknownState(id))?)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn trie(&self) -> &SubsequenceTrie {
        &self.trie
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    pub fn stability(&self) -> &StabilityTracker {
        &self.stability
    }

    pub fn current_state(&self) -> Option<StateId> {
        self.current_state
    }

    pub fn is_target_mode(&self) -> bool {
        self.target_mode
    }

    pub fn buffered_steps(&self) -> usize {
        self.buffer.len()
    }

    pub fn decisions(&self) -> u64 {
        self.decisions
    }
}
