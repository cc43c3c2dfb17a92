//! Dependency ordering of pending changes.
//!
//! Constraints:
//! - an `Add` runs after the `Add` of its parent directory
//! - an `Add` runs after the `Remove` of any name differing only in case
//! - a `Remove` runs after the `Remove` of each direct child
//!
//! Among ready changes the next one is picked at random, so tests that
//! inject a seeded generator exercise many valid orders.

use std::collections::HashMap;

use rand::{Rng, RngCore};

use super::SyncError;
use super::change::{PreSyncDetails, SyncOperation};
use crate::fs::entry::parent_name;

fn case_key(name: &str) -> String {
    name.to_uppercase()
}

/// For each change, the indices of the changes it must wait for.
pub fn dependencies(changes: &[PreSyncDetails]) -> Vec<Vec<usize>> {
    let mut adds: HashMap<&str, usize> = HashMap::new();
    let mut removes_by_case: HashMap<String, Vec<usize>> = HashMap::new();
    let mut removes_by_parent: HashMap<&str, Vec<usize>> = HashMap::new();

    for (i, change) in changes.iter().enumerate() {
        let name = change.decr_file_name.as_str();
        if name.is_empty() {
            continue;
        }
        match change.operation {
            SyncOperation::Add => {
                adds.insert(name, i);
            }
            SyncOperation::Remove => {
                removes_by_case.entry(case_key(name)).or_default().push(i);
                if let Some(parent) = parent_name(name) {
                    removes_by_parent.entry(parent).or_default().push(i);
                }
            }
            _ => {}
        }
    }

    changes
        .iter()
        .enumerate()
        .map(|(i, change)| {
            let name = change.decr_file_name.as_str();
            let mut deps = Vec::new();
            match change.operation {
                SyncOperation::Add => {
                    if let Some(&parent) = parent_name(name).and_then(|p| adds.get(p)) {
                        deps.push(parent);
                    }
                    if let Some(dups) = removes_by_case.get(&case_key(name)) {
                        deps.extend(dups.iter().copied().filter(|&d| d != i));
                    }
                }
                SyncOperation::Remove if !name.is_empty() => {
                    if let Some(children) = removes_by_parent.get(name) {
                        deps.extend(children.iter().copied());
                    }
                }
                _ => {}
            }
            deps
        })
        .collect()
}

/// Kahn's algorithm with a random choice among ready nodes.
///
/// Returns the order, or the indices that could not be placed.
pub fn topological_order(dependencies: &[Vec<usize>], rng: &mut dyn RngCore) -> Result<Vec<usize>, Vec<usize>> {
    let count = dependencies.len();
    let mut pending = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (i, deps) in dependencies.iter().enumerate() {
        pending[i] = deps.len();
        for &d in deps {
            dependents[d].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while !ready.is_empty() {
        let next = ready.swap_remove(rng.random_range(0..ready.len()));
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| pending[i] > 0).collect())
    }
}

/// Reorder `changes` so every dependency runs first.
pub fn order_changes(changes: Vec<PreSyncDetails>, rng: &mut dyn RngCore) -> Result<Vec<PreSyncDetails>, SyncError> {
    let deps = dependencies(&changes);
    match topological_order(&deps, rng) {
        Ok(order) => {
            let mut slots: Vec<Option<PreSyncDetails>> = changes.into_iter().map(Some).collect();
            Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
        }
        Err(stuck) => Err(SyncError::DependencyCycle {
            names: stuck
                .into_iter()
                .map(|i| changes[i].display_name().to_string())
                .collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::sync::change::SyncMode;

    fn change(name: &str, operation: SyncOperation) -> PreSyncDetails {
        PreSyncDetails {
            decr_file_name: name.to_string(),
            encr_file_name: format!("{name}.hx"),
            log_entry: None,
            decr_entry: None,
            encr_entry: None,
            encr_header: None,
            header_error: None,
            sync_mode: SyncMode::EncryptedSide,
            operation,
        }
    }

    fn position(order: &[PreSyncDetails], name: &str, operation: SyncOperation) -> usize {
        order
            .iter()
            .position(|c| c.decr_file_name == name && c.operation == operation)
            .unwrap()
    }

    #[test]
    fn test_parents_added_first_and_children_removed_first() {
        let changes = vec![
            change("a/b/c.txt", SyncOperation::Add),
            change("a/b", SyncOperation::Add),
            change("a", SyncOperation::Add),
            change("x/y.txt", SyncOperation::Remove),
            change("x", SyncOperation::Remove),
            change("z", SyncOperation::Change),
        ];
        for seed in 0..100 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let order = order_changes(changes.clone(), &mut rng).unwrap();
            assert_eq!(order.len(), changes.len());
            assert!(position(&order, "a", SyncOperation::Add) < position(&order, "a/b", SyncOperation::Add));
            assert!(position(&order, "a/b", SyncOperation::Add) < position(&order, "a/b/c.txt", SyncOperation::Add));
            assert!(position(&order, "x/y.txt", SyncOperation::Remove) < position(&order, "x", SyncOperation::Remove));
        }
    }

    #[test]
    fn test_case_rename_removes_before_adding() {
        let changes = vec![change("FILE.txt", SyncOperation::Add), change("file.txt", SyncOperation::Remove)];
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let order = order_changes(changes.clone(), &mut rng).unwrap();
            assert_eq!(order[0].decr_file_name, "file.txt");
        }
    }

    #[test]
    fn test_order_varies_with_seed() {
        let changes: Vec<_> = (0..8).map(|i| change(&format!("f{i}"), SyncOperation::Add)).collect();
        let orders: std::collections::HashSet<Vec<String>> = (0..10)
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                order_changes(changes.clone(), &mut rng)
                    .unwrap()
                    .into_iter()
                    .map(|c| c.decr_file_name)
                    .collect()
            })
            .collect();
        assert!(orders.len() > 1);
    }

    #[test]
    fn test_cycle_is_reported() {
        let deps = vec![vec![1], vec![0], vec![]];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let stuck = topological_order(&deps, &mut rng).unwrap_err();
        assert_eq!(stuck, vec![0, 1]);
    }
}
