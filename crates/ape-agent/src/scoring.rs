//! Distance-to-target scores for states.
//!
//! Every state that has observed a target hit is seeded with the best hit
//! ratio among its outgoing edges. Scores then flow backwards over incoming
//! edges, decaying by `decay` per hop. The queue is kept sorted by score,
//! highest first, and a state is scored only the first time it is reached,
//! so it always keeps the highest score any propagation could give it.

use std::collections::{BTreeMap, VecDeque};

use ape_model::{Graph, StateId};
use tracing::{debug, trace};

use crate::error::AgentError;

pub type StateScores = BTreeMap<StateId, f64>;

pub fn score_states(graph: &Graph, decay: f64) -> Result<StateScores, AgentError> {
    let mut scores = StateScores::new();
    let mut queue: VecDeque<(StateId, f64)> = VecDeque::new();

    for &state in graph.met_target_states() {
        let score = graph
            .out_transitions(state)
            .map(|t| t.met_target_ratio())
            .fold(0.0, f64::max);
        if score <= 0.0 {
            return Err(AgentError::Invariant(format!(
                "target state s{state} has a zero score"
            )));
        }
        debug!(state, score, "target state");
        scores.insert(state, score);
        queue.push_back((state, score));
    }
    queue
        .make_contiguous()
        .sort_by(|a, b| b.1.total_cmp(&a.1));

    while let Some((state, score)) = queue.pop_front() {
        let propagated = score * decay;
        for edge in graph.in_transitions(state) {
            if scores.contains_key(&edge.source) {
                continue;
            }
            scores.insert(edge.source, propagated);
            let at = queue.partition_point(|&(_, s)| s >= propagated);
            queue.insert(at, (edge.source, propagated));
            trace!(state = edge.source, score = propagated, "propagated score");
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ape_model::{ActionType, GuiNode, GuiSnapshot, Widget};

    fn screen(activity: &str, widgets: &[&str]) -> GuiSnapshot {
        GuiSnapshot::new(
            activity,
            widgets
                .iter()
                .map(|w| GuiNode {
                    widget: Widget::new(*w, &[ActionType::Click]),
                    bounds: Default::default(),
                })
                .collect(),
        )
    }

    fn click(graph: &Graph, state: StateId, widget: &str) -> ape_model::ActionId {
        graph
            .state(state)
            .unwrap()
            .actions()
            .iter()
            .find(|a| a.target.as_deref() == Some(widget))
            .unwrap()
            .id
    }

    #[test]
    fn test_empty_without_hits() {
        let mut graph = Graph::new();
        graph.observe(screen("A", &["x"]));
        assert!(score_states(&graph, 0.9).unwrap().is_empty());
    }

    #[test]
    fn test_predecessor_decays_once_per_hop() {
        // P -> S -> T, hit recorded on S -> T.
        let mut graph = Graph::new();
        let p = graph.observe(screen("P", &["go"]));
        let s = graph.observe(screen("S", &["hit"]));
        let t = graph.observe(screen("T", &["z"]));
        let go = click(&graph, p, "go");
        let hit = click(&graph, s, "hit");
        graph.record_transition(p, go, s).unwrap();
        let edge = graph.record_transition(s, hit, t).unwrap();
        graph.record_target_hit(edge).unwrap();

        let scores = score_states(&graph, 0.9).unwrap();
        assert_eq!(scores[&s], 1.0);
        assert_eq!(scores[&p], 0.9 * scores[&s]);
        assert!(!scores.contains_key(&t));
    }

    #[test]
    fn test_higher_score_is_never_overwritten() {
        // Q reaches both a strong target H (ratio 1) and a weak one W
        // (ratio 0.25); Q must keep the score from H.
        let mut graph = Graph::new();
        let q = graph.observe(screen("Q", &["to_h", "to_w"]));
        let h = graph.observe(screen("H", &["h"]));
        let w = graph.observe(screen("W", &["w"]));
        let end = graph.observe(screen("E", &["e"]));
        let to_h = click(&graph, q, "to_h");
        let to_w = click(&graph, q, "to_w");
        graph.record_transition(q, to_w, w).unwrap();
        graph.record_transition(q, to_h, h).unwrap();

        let h_action = click(&graph, h, "h");
        let h_edge = graph.record_transition(h, h_action, end).unwrap();
        graph.record_target_hit(h_edge).unwrap();
        let w_action = click(&graph, w, "w");
        let w_edge = graph.record_transition(w, w_action, end).unwrap();
        for _ in 0..3 {
            graph.record_transition(w, w_action, end).unwrap();
        }
        graph.record_target_hit(w_edge).unwrap();

        let scores = score_states(&graph, 0.9).unwrap();
        assert_eq!(scores[&w], 0.25);
        assert_eq!(scores[&q], 0.9);
    }
}
