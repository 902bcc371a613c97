//! Grouping by equivalence key: stable sort, then fold adjacent equal-key
//! runs. Every reconciliation level (records into files, files into
//! datasets, both dedup passes) is a use of this one routine.

/// Sort `items` by `key` (stable) and collect the equal-key runs in key
/// order.
pub fn group_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<(K, Vec<T>)>
where
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    let mut keyed: Vec<(K, T)> = items.into_iter().map(|item| (key(&item), item)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for (k, item) in keyed {
        match groups.last_mut() {
            Some((current, run)) if *current == k => run.push(item),
            _ => groups.push((k.clone(), vec![item])),
        }
    }
    groups
}

/// Keep the first item of every equal-key run. The result is ordered by key;
/// within a run, "first" means first under the input order (the sort is
/// stable).
pub fn dedup_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    group_by_key(items, key)
        .into_iter()
        .filter_map(|(_, run)| run.into_iter().next())
        .collect()
}
