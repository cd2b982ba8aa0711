mod common;

use editor_daemon::{CancellationToken, NodeId, SyntaxTree, TextRange, TreePartitioner};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const LEN: usize = 300;

fn random_range(rng: &mut StdRng) -> TextRange {
    let start = rng.gen_range(0..=LEN);
    let end = rng.gen_range(start..=LEN);
    TextRange::new(start, end)
}

#[test]
fn test_inside_and_outside_cover_exactly_the_intersecting_nodes() {
    common::init_tracing();
    let partitioner = TreePartitioner::new();
    let token = CancellationToken::new();

    for seed in 0..40 {
        let mut rng = StdRng::seed_from_u64(seed);
        let tree = common::random_tree(&mut rng, LEN);

        for _ in 0..5 {
            let restrict = random_range(&mut rng);
            let priority = random_range(&mut rng)
                .intersection(&restrict)
                .unwrap_or(TextRange::empty(restrict.start));
            let partition = partitioner
                .partition(&tree, restrict, priority, &token)
                .unwrap();

            let collected: Vec<NodeId> = partition.nodes().collect();
            let unique: BTreeSet<NodeId> = collected.iter().copied().collect();
            assert_eq!(unique.len(), collected.len(), "seed {seed}: duplicate nodes");

            let expected: BTreeSet<NodeId> = tree
                .node_ids()
                .filter(|node| tree.range(*node).intersects(&restrict))
                .collect();
            assert_eq!(unique, expected, "seed {seed}, restrict {restrict}");

            // A reused partition may carry a wider priority range than requested.
            let split = partition.priority_range;
            assert!(split.contains_range(&priority));
            for node in &partition.inside {
                assert!(split.contains_range(&tree.range(*node)));
            }
            for node in &partition.outside {
                assert!(!split.contains_range(&tree.range(*node)));
            }
            // The whole tree was walked and its root is collected last.
            assert!(partition.ancestors.is_empty());
        }
    }
}

#[test]
fn test_children_are_listed_before_their_parents() {
    let mut rng = StdRng::seed_from_u64(7);
    let tree = common::random_tree(&mut rng, LEN);
    let partition = TreePartitioner::new()
        .partition(
            &tree,
            TextRange::whole(LEN),
            TextRange::whole(LEN),
            &CancellationToken::new(),
        )
        .unwrap();

    let position = |node: NodeId| partition.inside.iter().position(|n| *n == node);
    for node in &partition.inside {
        if let Some(parent) = tree.parent(*node) {
            assert!(position(*node) < position(parent));
        }
    }
    assert_eq!(partition.inside.last(), Some(&tree.root()));
}

#[test]
fn test_new_stamp_replaces_cached_walk() {
    let mut rng = StdRng::seed_from_u64(11);
    let tree = common::random_tree(&mut rng, LEN);
    let partitioner = TreePartitioner::new();
    let token = CancellationToken::new();
    let restrict = TextRange::new(40, 120);

    let first = partitioner
        .partition(&tree, restrict, restrict, &token)
        .unwrap();
    let stamp = tree.modification_stamp() + 1;
    let tree = tree.with_stamp(stamp);
    let second = partitioner
        .partition(&tree, restrict, TextRange::new(40, 60), &token)
        .unwrap();

    assert_eq!(partitioner.cached_walks(), 1);
    assert_eq!(first.len(), second.len());
    assert!(second.inside.len() <= first.inside.len());
}
