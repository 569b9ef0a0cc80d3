//! Billing attribution across snapshots sharing a file.
//!
//! Snapshots are grouped by billing profile; each group is represented by its
//! smallest snapshot id, compared as strings.

use std::collections::HashMap;

/// Map every snapshot id to its group's billing representative.
///
/// `candidates` yields `(snapshot_id, billing_profile_id)` pairs. The result
/// does not depend on their order.
pub fn attribute<'a, I>(candidates: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let candidates: Vec<(&str, &str)> = candidates.into_iter().collect();

    let mut representatives: HashMap<&str, &str> = HashMap::new();
    for &(snapshot, profile) in &candidates {
        representatives
            .entry(profile)
            .and_modify(|current| {
                if snapshot < *current {
                    *current = snapshot;
                }
            })
            .or_insert(snapshot);
    }

    candidates
        .iter()
        .map(|&(snapshot, profile)| {
            let representative = representatives.get(profile).copied().unwrap_or(snapshot);
            (snapshot.to_string(), representative.to_string())
        })
        .collect()
}
