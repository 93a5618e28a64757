use ape_agent::{
    score_states, AcceptReject, StateScores, TargetChoice, TargetContext, TargetSelector,
    WeightFolding,
};
use ape_model::{ActionType, Graph, GuiNode, GuiSnapshot, StateId, SubsequenceTrie, Widget};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

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

struct Fixture {
    graph: Graph,
    main: StateId,
    lonely: StateId,
    hit_edge: u32,
}

/// Main --a--> A (hit), Main --b--> B, and back edges to Main.
fn fixture() -> Fixture {
    let mut graph = Graph::new();
    let main = graph.observe(screen("Main", &["a", "b"]));
    let a = graph.observe(screen("A", &[]));
    let b = graph.observe(screen("B", &[]));
    let lonely = graph.observe(screen("Lonely", &[]));

    let actions: Vec<u32> = graph.state(main).unwrap().actions().iter().map(|x| x.id).collect();
    let (click_a, click_b) = (actions[0], actions[1]);
    let back_a = graph.state(a).unwrap().back_action().id;
    let back_b = graph.state(b).unwrap().back_action().id;

    let hit_edge = graph.record_transition(main, click_a, a).unwrap();
    graph.record_target_hit(hit_edge).unwrap();
    graph.record_transition(main, click_b, b).unwrap();
    graph.record_transition(a, back_a, main).unwrap();
    graph.record_transition(b, back_b, main).unwrap();

    Fixture {
        graph,
        main,
        lonely,
        hit_edge,
    }
}

fn context<'a>(
    f: &'a Fixture,
    trie: &'a SubsequenceTrie,
    scores: &'a StateScores,
    state: StateId,
) -> TargetContext<'a> {
    TargetContext {
        graph: &f.graph,
        trie,
        state,
        scores,
        met_target_weight: 8.0,
        reject_scale: 1.0,
        count_limit: 3,
    }
}

#[test]
fn test_weight_folding_prefers_hit_edge() {
    let f = fixture();
    let scores = score_states(&f.graph, 0.9).unwrap();
    let trie = SubsequenceTrie::new(50, 0.5);
    let ctx = context(&f, &trie, &scores, f.main);

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut selector = WeightFolding;
    let mut hits = 0;
    for _ in 0..200 {
        if selector.select(&ctx, &mut rng).unwrap() == TargetChoice::Chosen(f.hit_edge) {
            hits += 1;
        }
    }
    assert!(hits > 150, "hit edge chosen {hits} times");
}

#[test]
fn test_unscored_neighbourhood_has_no_transition() {
    let f = fixture();
    let scores = score_states(&f.graph, 0.9).unwrap();
    assert!(!scores.contains_key(&f.lonely));
    let trie = SubsequenceTrie::new(50, 0.5);
    let ctx = context(&f, &trie, &scores, f.lonely);

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    assert_eq!(
        WeightFolding.select(&ctx, &mut rng).unwrap(),
        TargetChoice::NoTransition
    );
}

#[test]
fn test_accept_reject_chooses_an_out_edge() {
    let f = fixture();
    let scores = score_states(&f.graph, 0.9).unwrap();
    let trie = SubsequenceTrie::new(50, 0.5);
    let ctx = context(&f, &trie, &scores, f.main);

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut selector = AcceptReject { max_rejects: 30 };
    match selector.select(&ctx, &mut rng).unwrap() {
        TargetChoice::Chosen(id) => {
            assert_eq!(f.graph.transition(id).unwrap().source, f.main);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_accept_reject_without_budget_rejects() {
    let f = fixture();
    let scores = score_states(&f.graph, 0.9).unwrap();
    let trie = SubsequenceTrie::new(50, 0.5);
    let ctx = context(&f, &trie, &scores, f.main);

    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut selector = AcceptReject { max_rejects: 0 };
    assert_eq!(selector.select(&ctx, &mut rng).unwrap(), TargetChoice::AllRejected);
}
