//! Union-find community detection over the undirected document-relation graph.

use std::collections::HashMap;

/// Disjoint-set forest with path compression and arbitrary-root union.
struct UnionFind {
    parent: HashMap<i64, i64>,
}

impl UnionFind {
    fn new() -> Self {
        Self { parent: HashMap::new() }
    }

    fn make_set(&mut self, x: i64) {
        self.parent.entry(x).or_insert(x);
    }

    fn find(&mut self, x: i64) -> i64 {
        let p = *self.parent.get(&x).unwrap_or(&x);
        if p == x {
            return x;
        }
        let root = self.find(p);
        self.parent.insert(x, root);
        root
    }

    fn union(&mut self, a: i64, b: i64) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Computes the community id for every document id in `document_ids`, given
/// the set of relation edges. Communities are numbered `0, 1, 2, ...` in the
/// order their root is first observed while iterating `document_ids` in
/// ascending order. Returns `(assignment, community_count)`.
pub fn detect(document_ids: &[i64], edges: &[(i64, i64)]) -> (HashMap<i64, i32>, i32) {
    let mut uf = UnionFind::new();
    for &id in document_ids {
        uf.make_set(id);
    }
    for &(a, b) in edges {
        uf.make_set(a);
        uf.make_set(b);
        uf.union(a, b);
    }

    let mut sorted_ids: Vec<i64> = document_ids.to_vec();
    sorted_ids.sort_unstable();

    let mut root_to_community: HashMap<i64, i32> = HashMap::new();
    let mut assignment = HashMap::new();
    let mut next_id = 0i32;

    for id in sorted_ids {
        let root = uf.find(id);
        let community = *root_to_community.entry(root).or_insert_with(|| {
            let c = next_id;
            next_id += 1;
            c
        });
        assignment.insert(id, community);
    }

    (assignment, next_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_documents_each_form_their_own_community() {
        let (assignment, count) = detect(&[1, 2, 3], &[]);
        assert_eq!(count, 3);
        assert_ne!(assignment[&1], assignment[&2]);
        assert_ne!(assignment[&2], assignment[&3]);
    }

    #[test]
    fn connected_documents_share_a_community() {
        let (assignment, count) = detect(&[1, 2, 3, 4], &[(1, 2), (2, 3)]);
        assert_eq!(count, 2);
        assert_eq!(assignment[&1], assignment[&2]);
        assert_eq!(assignment[&2], assignment[&3]);
        assert_ne!(assignment[&3], assignment[&4]);
    }

    #[test]
    fn communities_are_numbered_by_first_observation_order() {
        let (assignment, _) = detect(&[1, 2, 3], &[(2, 3)]);
        assert_eq!(assignment[&1], 0);
        assert_eq!(assignment[&2], 1);
        assert_eq!(assignment[&3], 1);
    }

    #[test]
    fn cyclic_edges_do_not_break_union_find() {
        let (assignment, count) = detect(&[1, 2, 3], &[(1, 2), (2, 3), (3, 1)]);
        assert_eq!(count, 1);
        assert_eq!(assignment[&1], assignment[&2]);
        assert_eq!(assignment[&2], assignment[&3]);
    }

    #[test]
    fn edges_referencing_unknown_ids_still_union_correctly() {
        let (assignment, count) = detect(&[5, 6], &[(5, 6)]);
        assert_eq!(count, 1);
        assert_eq!(assignment[&5], assignment[&6]);
    }
}
