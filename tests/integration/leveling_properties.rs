//! Property tests for dependency leveling.
//!
//! Random graphs are generated over `n` tasks. Acyclic graphs only ever
//! point a task at a lower-indexed one; cyclic graphs add one edge back
//! from the bottom of an existing chain.

use std::collections::HashMap;

use proptest::prelude::*;

use weave::DependencyAnalyzer;

use crate::fixtures::{ns, test_task};

fn acyclic_batch(n: usize, edges: &[(usize, usize)]) -> Vec<weave::Task> {
    (0..n)
        .map(|i| {
            edges
                .iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(a, b)| a != b && a.max(b) == &i)
                .fold(test_task(&format!("n{}", i)), |task, (a, b)| {
                    task.depends_on(&ns(&format!("n{}", a.min(b))))
                })
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_levels_cover_every_task_once(
        n in 1usize..12,
        edges in proptest::collection::vec((0usize..12, 0usize..12), 0..30),
    ) {
        let tasks = acyclic_batch(n, &edges);
        let groups = DependencyAnalyzer::new().group_parallel_tasks(&tasks).unwrap();

        let mut level_of: HashMap<String, usize> = HashMap::new();
        for group in &groups {
            for task in &group.tasks {
                prop_assert!(level_of.insert(task.namespace.clone(), group.level).is_none());
            }
        }
        prop_assert_eq!(level_of.len(), n);

        for task in &tasks {
            for dep in &task.explicit_dependencies {
                prop_assert!(level_of[dep] < level_of[&task.namespace]);
            }
        }
    }

    #[test]
    fn prop_levels_are_minimal(
        n in 1usize..12,
        edges in proptest::collection::vec((0usize..12, 0usize..12), 0..30),
    ) {
        let tasks = acyclic_batch(n, &edges);
        let analyzer = DependencyAnalyzer::new();
        let graph = analyzer.build_graph(&tasks);
        let groups = analyzer.group_parallel_tasks(&tasks).unwrap();

        for group in &groups {
            for task in &group.tasks {
                prop_assert_eq!(group.level, analyzer.dependency_depth(&graph, &task.namespace));
            }
        }
    }

    #[test]
    fn prop_back_edge_is_detected(
        n in 2usize..12,
        chain_len in 2usize..12,
    ) {
        let len = chain_len.min(n);
        let mut tasks: Vec<weave::Task> = (0..n)
            .map(|i| {
                let task = test_task(&format!("n{}", i));
                if i > 0 && i < len {
                    task.depends_on(&ns(&format!("n{}", i - 1)))
                } else {
                    task
                }
            })
            .collect();
        tasks[0] = tasks[0].clone().depends_on(&ns(&format!("n{}", len - 1)));

        let analyzer = DependencyAnalyzer::new();
        let cycles = analyzer.detect_cycles(&analyzer.build_graph(&tasks));
        prop_assert!(!cycles.is_empty());
        for cycle in &cycles {
            prop_assert_eq!(cycle.first(), cycle.last());
        }

        let err = analyzer.group_parallel_tasks(&tasks).unwrap_err();
        prop_assert!(err.is_cyclic());
    }
}
