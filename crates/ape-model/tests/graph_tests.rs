use ape_model::{
    ActionId, ActionType, FnFilter, Graph, GuiNode, GuiSnapshot, StateId, Subsequence, Widget,
};

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

fn click(graph: &Graph, state: StateId, widget: &str) -> ActionId {
    graph
        .state(state)
        .unwrap()
        .actions()
        .iter()
        .find(|a| a.target.as_deref() == Some(widget))
        .unwrap()
        .id
}

/// A -> B -> D and A -> C -> D.
fn diamond() -> (Graph, [StateId; 4]) {
    let mut graph = Graph::new();
    let a = graph.observe(screen("A", &["to_b", "to_c"]));
    let b = graph.observe(screen("B", &["to_d"]));
    let c = graph.observe(screen("C", &["to_d"]));
    let d = graph.observe(screen("D", &["done"]));

    let to_b = click(&graph, a, "to_b");
    let to_c = click(&graph, a, "to_c");
    let b_to_d = click(&graph, b, "to_d");
    let c_to_d = click(&graph, c, "to_d");
    graph.record_transition(a, to_b, b).unwrap();
    graph.record_transition(a, to_c, c).unwrap();
    graph.record_transition(b, b_to_d, d).unwrap();
    graph.record_transition(c, c_to_d, d).unwrap();
    (graph, [a, b, c, d])
}

#[test]
fn test_repeated_triple_yields_one_transition() {
    let mut graph = Graph::new();
    let a = graph.observe(screen("A", &["go"]));
    let b = graph.observe(screen("B", &["stay"]));
    let go = click(&graph, a, "go");

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(graph.record_transition(a, go, b).unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(graph.transition_count(), 1);
    assert_eq!(graph.transition(ids[0]).unwrap().visited_count, 5);
    assert_eq!(graph.out_transitions(a).count(), 1);
    assert_eq!(graph.in_transitions(b).count(), 1);
}

#[test]
fn test_diamond_returns_both_shortest_paths() {
    let (graph, [a, b, c, d]) = diamond();
    let paths = graph.move_to_state(a, d, false, 10);
    assert_eq!(paths.len(), 2);

    let mut middles: Vec<StateId> = paths.iter().map(|p| p.states()[1]).collect();
    middles.sort();
    assert_eq!(middles, vec![b, c]);
    assert!(paths.iter().all(|p| p.len() == 2 && p.last_state() == d));
}

#[test]
fn test_max_len_bounds_search() {
    let (graph, [a, _, _, d]) = diamond();
    assert!(graph.move_to_state(a, d, false, 1).is_empty());
}

#[test]
fn test_extend_is_applied_before_expansion() {
    let (graph, [a, b, _, d]) = diamond();
    // Refusing edges into B must keep every path through B out of the result.
    let filter = FnFilter::new(
        move |_: &Graph, p: &Subsequence| p.last_state() == d,
        move |_: &Graph, _: &Subsequence, e: &ape_model::StateTransition| e.target != b,
    );
    let paths = graph.find_shortest_paths(a, &filter, 10);
    assert_eq!(paths.len(), 1);
    assert!(!paths[0].states().contains(&b));
}

#[test]
fn test_paths_never_reuse_a_transition() {
    let mut graph = Graph::new();
    let a = graph.observe(screen("A", &["loop", "out"]));
    let b = graph.observe(screen("B", &["x"]));
    let looped = click(&graph, a, "loop");
    let out = click(&graph, a, "out");
    graph.record_transition(a, looped, a).unwrap();
    graph.record_transition(a, out, b).unwrap();

    let filter = FnFilter::new(
        |_: &Graph, p: &Subsequence| p.len() >= 1,
        |_: &Graph, _: &Subsequence, _: &ape_model::StateTransition| true,
    );
    for path in graph.find_shortest_paths(a, &filter, 5) {
        let mut edges = path.edges().to_vec();
        edges.sort();
        edges.dedup();
        assert_eq!(edges.len(), path.len());
    }
}

#[test]
fn test_back_edges_skipped_unless_requested() {
    let mut graph = Graph::new();
    let a = graph.observe(screen("A", &["open"]));
    let b = graph.observe(screen("B", &["noop"]));
    let open = click(&graph, a, "open");
    let back = graph.state(b).unwrap().back_action().id;
    graph.record_transition(a, open, b).unwrap();
    graph.record_transition(b, back, a).unwrap();

    assert!(graph.move_to_state(b, a, false, 3).is_empty());
    let paths = graph.move_to_state(b, a, true, 3);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].first_action(&graph), Some(back));
}

#[test]
fn test_weak_edges_are_not_followed() {
    let mut graph = Graph::new();
    let a = graph.observe(screen("A", &["flaky"]));
    let b = graph.observe(screen("B", &["x"]));
    let c = graph.observe(screen("C", &["y"]));
    let flaky = click(&graph, a, "flaky");
    graph.record_transition(a, flaky, b).unwrap();
    graph.record_transition(a, flaky, c).unwrap();
    graph.record_transition(a, flaky, c).unwrap();

    assert!(graph.move_to_state(a, b, false, 3).is_empty());
    assert_eq!(graph.move_to_state(a, c, false, 3).len(), 1);
}

#[test]
fn test_activity_visited_rate() {
    let mut graph = Graph::new();
    let a = graph.observe(screen("Main", &["x", "y"]));
    let b = graph.observe(screen("Other", &["z"]));
    let x = click(&graph, a, "x");
    graph.record_transition(a, x, b).unwrap();

    let main = graph.activity("Main").unwrap();
    assert!((main.visited_rate(&graph) - 0.5).abs() < 1e-9);
    assert_eq!(graph.activity("Other").unwrap().visited_rate(&graph), 0.0);
}
