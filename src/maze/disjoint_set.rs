// src/maze/disjoint_set.rs
// Union-find over flattened cell indices, only alive while a maze is being carved

/// Union by rank, recursive find without path compression.
///
/// `is_fully_connected()` is an O(n) scan. Mazes are small (≤ ~30x30 in play) so
/// this is acceptable, but it does not scale: the generator uses the live
/// `component_count()` instead, which answers the same question in O(1).
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u32>,
    components: usize,
}

impl DisjointSet {
    /// Build a set with `len` singleton elements
    pub fn new(len: usize) -> Self {
        let mut set = Self {
            parent: vec![0; len],
            rank: vec![0; len],
            components: 0,
        };
        for x in 0..len {
            set.make_set(x);
        }
        set
    }

    pub fn make_set(&mut self, x: usize) {
        debug_assert!(x < self.parent.len(), "make_set out of range: {x}");
        self.parent[x] = x;
        self.rank[x] = 0;
        self.components += 1;
    }

    pub fn find(&self, x: usize) -> usize {
        let parent = self.parent[x];
        if parent == x {
            x
        } else {
            self.find(parent)
        }
    }

    /// Merge the sets holding `x` and `y`. Returns false if they were already joined.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return false;
        }

        match self.rank[root_x].cmp(&self.rank[root_y]) {
            std::cmp::Ordering::Less => self.parent[root_x] = root_y,
            std::cmp::Ordering::Greater => self.parent[root_y] = root_x,
            std::cmp::Ordering::Equal => {
                self.parent[root_y] = root_x;
                self.rank[root_x] += 1;
            }
        }
        self.components -= 1;
        true
    }

    pub fn is_fully_connected(&self) -> bool {
        let Some(first) = self.parent.first() else {
            return true;
        };
        let root = self.find(*first);
        (0..self.parent.len()).all(|x| self.find(x) == root)
    }

    pub fn component_count(&self) -> usize {
        self.components
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}
