//! Array-backed disjoint set with path compression and union by rank.
//!
//! Indices are positions into the finalizer's point list, so the structure
//! is a pair of flat arrays rather than an object graph, and a single mutex
//! around it is enough for parallel unions.

pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // second pass: point the whole chain at the root
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[rb] < self.rank[ra] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
    }

    /// Connected components. Each component's members are ascending and the
    /// components themselves are ordered by their smallest member, so the
    /// output is a pure function of the partition, not of union order.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root = std::collections::HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_insert_with(Vec::new).push(i);
        }
        let mut components: Vec<Vec<usize>> = by_root.into_values().collect();
        components.sort_by_key(|c| c[0]);
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(uf: &mut UnionFind) -> Vec<Vec<usize>> {
        uf.components()
    }

    #[test]
    fn singletons_without_unions() {
        let mut uf = UnionFind::new(3);
        assert_eq!(partition(&mut uf), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn union_links_transitively() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(3, 4);
        assert_eq!(uf.find(0), uf.find(2));
        assert_ne!(uf.find(0), uf.find(3));
        assert_eq!(partition(&mut uf), vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn partition_is_independent_of_union_order() {
        let edges = [(0, 1), (1, 2), (4, 5), (2, 3)];

        let mut forward = UnionFind::new(6);
        for (a, b) in edges {
            forward.union(a, b);
        }

        let mut reversed = UnionFind::new(6);
        for (a, b) in edges.iter().rev() {
            reversed.union(b.to_owned(), a.to_owned());
        }

        assert_eq!(partition(&mut forward), partition(&mut reversed));
        assert_eq!(
            partition(&mut forward),
            vec![vec![0, 1, 2, 3], vec![4, 5]]
        );
    }

    #[test]
    fn everything_linked_collapses_to_one_component() {
        let mut uf = UnionFind::new(4);
        for i in 0..3 {
            uf.union(i, i + 1);
        }
        assert_eq!(partition(&mut uf), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn self_union_is_a_noop() {
        let mut uf = UnionFind::new(2);
        uf.union(1, 1);
        assert_eq!(partition(&mut uf), vec![vec![0], vec![1]]);
    }
}
