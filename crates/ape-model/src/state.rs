use rand::Rng;

use crate::action::{Action, ActionFilter, ActionId, ActionType, ResolvedAction};
use crate::graph::StateId;
use crate::snapshot::{GuiSnapshot, StateKey};

/// A node of the GUI model, identified by its [`StateKey`].
///
/// Actions are generated from the key's widgets when the state is created,
/// with a synthesized back action appended last. Action ids are allocated
/// contiguously by the owning graph.
#[derive(Debug, Clone)]
pub struct State {
    pub id: StateId,
    key: StateKey,
    actions: Vec<Action>,
    first_action_id: ActionId,
    history: Vec<GuiSnapshot>,
    pub visited_count: u32,
}

impl State {
    pub(crate) fn new(id: StateId, key: StateKey, first_action_id: ActionId) -> Self {
        let mut actions = Vec::new();
        let mut next_id = first_action_id;
        for widget in key.widgets() {
            for &kind in &widget.actions {
                if kind == ActionType::Back {
                    continue;
                }
                actions.push(Action::new(next_id, id, kind, Some(widget.name.clone())));
                next_id += 1;
            }
        }
        actions.push(Action::new(next_id, id, ActionType::Back, None));

        Self {
            id,
            key,
            actions,
            first_action_id,
            history: Vec::new(),
            visited_count: 0,
        }
    }

    pub fn key(&self) -> &StateKey {
        &self.key
    }

    pub fn activity(&self) -> &str {
        self.key.activity()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        let slot = id.checked_sub(self.first_action_id)? as usize;
        self.actions.get(slot)
    }

    pub(crate) fn action_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        let slot = id.checked_sub(self.first_action_id)? as usize;
        self.actions.get_mut(slot)
    }

    pub fn owns_action(&self, id: ActionId) -> bool {
        self.action(id).is_some()
    }

    pub fn back_action(&self) -> &Action {
        // The constructor always appends the back action.
        &self.actions[self.actions.len() - 1]
    }

    pub fn is_back_enabled(&self) -> bool {
        let back = self.back_action();
        back.enabled && back.valid
    }

    pub fn targeted_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.requires_target())
    }

    pub fn collect_actions(&self, filter: ActionFilter) -> Vec<&Action> {
        self.actions.iter().filter(|a| filter.include(a)).collect()
    }

    pub fn first_action(&self, filter: ActionFilter) -> Option<&Action> {
        self.actions.iter().find(|a| filter.include(a))
    }

    /// Least visited action passing `filter`; earliest wins ties.
    pub fn greedy_pick_least_visited(&self, filter: ActionFilter) -> Option<&Action> {
        let mut best: Option<&Action> = None;
        for action in self.actions.iter().filter(|a| filter.include(a)) {
            match best {
                Some(b) if b.visited_count <= action.visited_count => {}
                _ => best = Some(action),
            }
        }
        best
    }

    /// Priority-weighted random pick among actions passing `filter`.
    pub fn randomly_pick_action<R: Rng>(
        &self,
        rng: &mut R,
        filter: ActionFilter,
        include_back: bool,
    ) -> Option<&Action> {
        let candidates: Vec<&Action> = self
            .actions
            .iter()
            .filter(|a| filter.include(a) && (include_back || !a.is_back()))
            .collect();
        pick_weighted(rng, &candidates)
    }

    /// Saturated when every enabled, valid action is saturated.
    pub fn is_saturated(&self) -> bool {
        self.actions
            .iter()
            .filter(|a| a.enabled && a.valid)
            .all(Action::is_saturated)
    }

    /// Mean saturation over enabled, valid, targeted actions.
    pub fn saturation(&self) -> f64 {
        let live: Vec<&Action> = self
            .targeted_actions()
            .filter(|a| a.enabled && a.valid)
            .collect();
        if live.is_empty() {
            return 1.0;
        }
        live.iter().map(|a| a.saturation()).sum::<f64>() / live.len() as f64
    }

    pub fn is_trivial(&self) -> bool {
        self.key.is_trivial()
    }

    pub fn history(&self) -> &[GuiSnapshot] {
        &self.history
    }

    pub fn latest_snapshot(&self) -> Option<&GuiSnapshot> {
        self.history.last()
    }

    /// Record a snapshot that mapped to this state and refresh per-action
    /// resolution from it.
    pub(crate) fn append_snapshot(&mut self, snapshot: GuiSnapshot) {
        for action in self.actions.iter_mut() {
            let Some(target) = &action.target else {
                continue;
            };
            let matches = snapshot.count_named(target) as u32;
            action.resolved_nodes = matches.max(1);
            action.enabled = matches > 0;
        }
        self.history.push(snapshot);
    }

    /// Bind `action` to one of the matching nodes of the latest snapshot,
    /// chosen uniformly at random.
    pub(crate) fn resolve_action<R: Rng>(
        &mut self,
        id: ActionId,
        rng: &mut R,
        throttle_millis: u64,
    ) -> Option<ResolvedAction> {
        let bounds = match self.action(id)?.target.clone() {
            None => None,
            Some(target) => {
                let snapshot = self.history.last()?;
                let nodes: Vec<_> = snapshot.nodes_named(&target).collect();
                if nodes.is_empty() {
                    return None;
                }
                Some(nodes[rng.gen_range(0..nodes.len())].bounds)
            }
        };

        let action = self.action_mut(id)?;
        action.resolved_count += 1;
        Some(ResolvedAction {
            action: action.id,
            state: action.state,
            kind: action.kind,
            target: action.target.clone(),
            bounds,
            throttle_millis,
        })
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}:{} A={} V={}", self.id, self.key, self.actions.len(), self.visited_count)
    }
}

/// Roulette-wheel selection over action priorities.
pub fn pick_weighted<'a, R: Rng>(rng: &mut R, candidates: &[&'a Action]) -> Option<&'a Action> {
    let total: u32 = candidates.iter().map(|a| a.priority).sum();
    if total == 0 {
        return candidates.first().copied();
    }
    let mut roll = rng.gen_range(0..total);
    for &action in candidates {
        if roll < action.priority {
            return Some(action);
        }
        roll -= action.priority;
    }
    candidates.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Bounds, GuiNode, Widget};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn key() -> StateKey {
        StateKey::new(
            "Main",
            vec![
                Widget::new("ok", &[ActionType::Click, ActionType::LongClick]),
                Widget::new("list", &[ActionType::ScrollTopDown]),
                Widget::new("label", &[]),
            ],
        )
    }

    fn snapshot(ok_count: usize) -> GuiSnapshot {
        let mut nodes = Vec::new();
        for i in 0..ok_count {
            nodes.push(GuiNode {
                widget: Widget::new("ok", &[ActionType::Click, ActionType::LongClick]),
                bounds: Bounds { left: i as i32, top: 0, right: 10, bottom: 10 },
            });
        }
        nodes.push(GuiNode {
            widget: Widget::new("list", &[ActionType::ScrollTopDown]),
            bounds: Bounds::default(),
        });
        GuiSnapshot::new("Main", nodes)
    }

    #[test]
    fn test_actions_generated_from_widgets() {
        let state = State::new(0, key(), 10);
        let kinds: Vec<ActionType> = state.actions().iter().map(|a| a.kind).collect();
        assert_eq!(kinds.len(), 4);
        assert!(state.back_action().is_back());
        assert_eq!(state.back_action().id, 13);
        assert_eq!(state.targeted_actions().count(), 3);
        assert!(state.action(9).is_none());
        assert!(state.owns_action(12));
    }

    #[test]
    fn test_snapshot_updates_resolution() {
        let mut state = State::new(0, key(), 0);
        state.append_snapshot(snapshot(2));
        let click = state
            .actions()
            .iter()
            .find(|a| a.kind == ActionType::Click)
            .map(|a| a.id)
            .unwrap();
        assert_eq!(state.action(click).unwrap().resolved_nodes, 2);

        state.append_snapshot(snapshot(0));
        assert!(!state.action(click).unwrap().enabled);
        assert_eq!(state.history().len(), 2);
    }

    #[test]
    fn test_greedy_pick_least_visited() {
        let mut state = State::new(0, key(), 0);
        for action in state.actions.iter_mut() {
            action.visited_count = 3;
        }
        state.actions[1].visited_count = 1;
        let picked = state.greedy_pick_least_visited(ActionFilter::EnabledValid).unwrap();
        assert_eq!(picked.id, 1);
    }

    #[test]
    fn test_random_pick_excludes_back_when_asked() {
        let state = State::new(0, key(), 0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let picked = state
                .randomly_pick_action(&mut rng, ActionFilter::EnabledValid, false)
                .unwrap();
            assert!(!picked.is_back());
        }
    }

    #[test]
    fn test_resolve_picks_matching_node() {
        let mut state = State::new(0, key(), 0);
        state.append_snapshot(snapshot(3));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // Widgets sort by name: "list" scroll is action 0, "ok" click is 1.
        let resolved = state.resolve_action(1, &mut rng, 200).unwrap();
        assert_eq!(resolved.target.as_deref(), Some("ok"));
        assert!(resolved.bounds.unwrap().left < 3);
        assert_eq!(resolved.throttle_millis, 200);

        let back = state.back_action().id;
        let resolved = state.resolve_action(back, &mut rng, 0).unwrap();
        assert!(resolved.bounds.is_none());
    }

    #[test]
    fn test_saturation() {
        let mut state = State::new(0, key(), 0);
        assert!(!state.is_saturated());
        for action in state.actions.iter_mut() {
            action.visited_count = 1;
        }
        assert!(state.is_saturated());
        assert!((state.saturation() - 1.0).abs() < 1e-9);
    }
}
