//! Target-directed transition selection.
//!
//! Two selectors share one contract: given scored states, pick an outgoing
//! transition of the current state that tends toward states where target
//! hits were observed. Both are seeded from the agent's rng.

use std::collections::{BTreeMap, HashMap};

use ape_model::{Graph, StateId, SubsequenceTrie, TransitionId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::config::TargetSelection;
use crate::error::AgentError;
use crate::probability::{priority_distribution, sample, transition_distribution, PathProbability};
use crate::scoring::StateScores;

/// Probability mass above which a folded distribution is a weighting bug.
const MAX_FOLDED_MASS: f64 = 1.1;

/// Everything a selector may read for one decision.
pub struct TargetContext<'a> {
    pub graph: &'a Graph,
    pub trie: &'a SubsequenceTrie,
    pub state: StateId,
    pub scores: &'a StateScores,
    pub met_target_weight: f64,
    /// Multiplier in `[0, 1]` applied to trie reject ratios.
    pub reject_scale: f64,
    pub count_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetChoice {
    Chosen(TransitionId),
    /// The state has no usable outgoing edge toward a scored state.
    NoTransition,
    /// Every candidate was rejected.
    AllRejected,
}

pub trait TargetSelector {
    fn select(
        &mut self,
        ctx: &TargetContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Result<TargetChoice, AgentError>;

    fn name(&self) -> &'static str;
}

pub fn selector_for(selection: TargetSelection) -> Box<dyn TargetSelector> {
    match selection {
        TargetSelection::WeightFolding => Box::new(WeightFolding),
        TargetSelection::AcceptReject { max_rejects } => Box::new(AcceptReject { max_rejects }),
    }
}

/// Scales each edge's probability by `1 - reject` using the trie's reject
/// ratios, renormalizes, and draws once.
pub struct WeightFolding;

impl TargetSelector for WeightFolding {
    fn select(
        &mut self,
        ctx: &TargetContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Result<TargetChoice, AgentError> {
        let distribution =
            transition_distribution(ctx.graph, ctx.state, ctx.scores, ctx.met_target_weight);
        if distribution.is_empty() {
            return Ok(TargetChoice::NoTransition);
        }

        let rejects: BTreeMap<TransitionId, f64> = if ctx.reject_scale > 0.0 {
            let mut model = PathProbability::new(ctx.graph, ctx.scores, ctx.met_target_weight);
            ctx.trie
                .rejection_ratios(ctx.state, ctx.count_limit, |t| model.probability(t))
        } else {
            BTreeMap::new()
        };

        let folded = if rejects.is_empty() {
            distribution
        } else {
            let mut sum = 0.0;
            let mut folded = Vec::with_capacity(distribution.len());
            for (id, p) in distribution {
                let reject = rejects.get(&id).map_or(0.0, |r| r * ctx.reject_scale);
                let value = p * (1.0 - reject);
                if reject > 0.0 {
                    debug!(transition = id, p, reject, "trie rejection");
                }
                sum += value;
                folded.push((id, value));
            }
            if sum <= 0.0 {
                return Ok(TargetChoice::AllRejected);
            }
            if sum > MAX_FOLDED_MASS {
                return Err(AgentError::Invariant(format!(
                    "folded probability mass {sum} exceeds {MAX_FOLDED_MASS}"
                )));
            }
            for (_, value) in folded.iter_mut() {
                *value /= sum;
            }
            folded
        };

        let u: f64 = rng.gen();
        match sample(&folded, u) {
            Some((id, p)) => {
                debug!(transition = id, p, "target candidate");
                Ok(TargetChoice::Chosen(id))
            }
            None => Ok(TargetChoice::NoTransition),
        }
    }

    fn name(&self) -> &'static str {
        "weight-folding"
    }
}

/// Metropolis-Hastings over neighbouring states.
///
/// A candidate `x'` is proposed from the priority distribution `q` and
/// accepted with `min(1, r(x') q(x | x') / (r(x) q(x' | x)))`, where `r` is
/// the state score. Self-loops are accepted outright.
pub struct AcceptReject {
    pub max_rejects: u32,
}

impl TargetSelector for AcceptReject {
    fn select(
        &mut self,
        ctx: &TargetContext<'_>,
        rng: &mut ChaCha8Rng,
    ) -> Result<TargetChoice, AgentError> {
        let proposal = priority_distribution(ctx.graph, ctx.state, ctx.met_target_weight);
        if proposal.is_empty() {
            return Ok(TargetChoice::NoTransition);
        }
        let current_score = ctx.scores.get(&ctx.state).copied().ok_or_else(|| {
            AgentError::Invariant(format!("current state s{} has no score", ctx.state))
        })?;

        let mut reverse_cache: HashMap<StateId, f64> = HashMap::new();
        for attempt in 0..self.max_rejects {
            let u: f64 = rng.gen();
            let Some((id, q)) = sample(&proposal, u) else {
                return Ok(TargetChoice::NoTransition);
            };
            let Some(edge) = ctx.graph.transition(id) else {
                return Ok(TargetChoice::NoTransition);
            };
            if edge.target == ctx.state {
                return Ok(TargetChoice::Chosen(id));
            }

            let target_score = ctx.scores.get(&edge.target).copied().unwrap_or(0.0);
            let q_back = *reverse_cache.entry(edge.target).or_insert_with(|| {
                priority_distribution(ctx.graph, edge.target, ctx.met_target_weight)
                    .iter()
                    .filter(|(t, _)| {
                        ctx.graph
                            .transition(*t)
                            .map_or(false, |back| back.target == ctx.state)
                    })
                    .map(|(_, p)| p)
                    .sum()
            });

            let alpha = (target_score * q_back / (current_score * q)).min(1.0);
            if rng.gen::<f64>() <= alpha {
                debug!(transition = id, alpha, attempt, "accepted");
                return Ok(TargetChoice::Chosen(id));
            }
            debug!(transition = id, alpha, attempt, "rejected");
        }
        Ok(TargetChoice::AllRejected)
    }

    fn name(&self) -> &'static str {
        "accept-reject"
    }
}
