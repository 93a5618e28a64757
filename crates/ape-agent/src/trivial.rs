//! Heuristics for low-information activities (About, Help, Login, ...).

use std::collections::BTreeSet;

use ape_model::{ActivityNode, Graph};

/// Activities cold enough, and simple or unexplored enough, to count as
/// trivial. Empty while at most `rank_threshold` activities are known.
pub fn collect_trivial_activities(graph: &Graph, rank_threshold: usize) -> BTreeSet<String> {
    let mut activities: Vec<&ActivityNode> = graph.activities().collect();
    if activities.len() <= rank_threshold {
        return BTreeSet::new();
    }
    activities.sort_by(|a, b| {
        a.visited_count
            .cmp(&b.visited_count)
            .then_with(|| a.name.cmp(&b.name))
    });

    let median = activities[activities.len() / 2].visited_count;
    let mean = activities.iter().map(|a| a.visited_count as u64).sum::<u64>()
        / activities.len() as u64;
    let threshold = (median as u64).max(mean);

    activities
        .iter()
        .take_while(|a| a.visited_count as u64 <= threshold)
        .filter(|a| is_trivial_activity(graph, a))
        .map(|a| a.name.clone())
        .collect()
}

fn is_trivial_activity(graph: &Graph, activity: &ActivityNode) -> bool {
    let states = activity.states.len();
    let hard_to_visit = activity.visited_count as usize > states >> 2;
    if !hard_to_visit {
        return true;
    }
    let explored = if states < 5 { 0.8 } else { 0.5 };
    activity.visited_rate(graph) <= explored
}
