//! Linear assignment: the Hungarian solver and the LAP cost layout.
//!
//! Both tracker steps pose the same question: given candidate links between
//! a set of "sources" and a set of "targets", each allowed or forbidden, pick
//! the set of links minimising total cost, where any source or target may
//! also stay unlinked at an alternative cost.
//!
//! The layout follows Jaqaman et al. (2008):
//!
//! ```text
//!            targets (m)        no-link (n)
//!          ┌──────────────────┬──────────────────┐
//! sources  │ link costs       │ diag(alt)        │
//!   (n)    │                  │                  │
//!          ├──────────────────┼──────────────────┤
//! no-link  │ diag(alt)        │ transpose, cost  │
//!   (m)    │                  │ set to min link  │
//!          └──────────────────┴──────────────────┘
//! ```
//!
//! Candidate links are stored sparsely. Rows and columns that share no chain
//! of allowed links cannot influence each other, so each connected component
//! is solved as its own (small) dense problem.

use std::collections::{BTreeMap, BTreeSet};

/// Factor applied to the largest allowed cost to get the no-link cost.
pub const ALTERNATIVE_COST_FACTOR: f64 = 1.05;

// ============================================================================
// CANDIDATE LINKS
// ============================================================================

/// Allowed links between `rows` sources and `cols` targets.
#[derive(Debug, Clone)]
pub struct LinkCosts {
    rows: usize,
    cols: usize,
    /// Allowed links keyed by (row, col)
    links: BTreeMap<(usize, usize), f64>,
}

impl LinkCosts {
    /// Creates a problem with every link forbidden.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            links: BTreeMap::new(),
        }
    }

    /// Allows the link `row → col` at `cost`.
    pub fn allow(&mut self, row: usize, col: usize, cost: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        self.links.insert((row, col), cost);
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.links.get(&(row, col)).copied()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of allowed links.
    pub fn allowed_count(&self) -> usize {
        self.links.len()
    }

    /// Allowed links of one row, ordered by column.
    fn row_links(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.links
            .range((row, 0)..(row + 1, 0))
            .map(|(&(_, col), &cost)| (col, cost))
    }

    /// Splits the links into independent sub-problems.
    fn components(&self) -> Vec<Component> {
        // Nodes: rows first, then columns offset by `rows`
        let mut sets = DisjointSet::new(self.rows + self.cols);
        for &(row, col) in self.links.keys() {
            sets.union(row, self.rows + col);
        }

        let mut groups: BTreeMap<usize, Component> = BTreeMap::new();
        for &(row, col) in self.links.keys() {
            let group = groups.entry(sets.find(row)).or_default();
            group.rows.insert(row);
            group.cols.insert(col);
        }
        groups.into_values().collect()
    }
}

/// Rows and columns connected through allowed links.
#[derive(Debug, Default)]
struct Component {
    rows: BTreeSet<usize>,
    cols: BTreeSet<usize>,
}

/// Union-find with path splitting and union by rank.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            let next = self.parent[x];
            self.parent[x] = self.parent[next];
            x = next;
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.rank[ra] >= self.rank[rb] { (ra, rb) } else { (rb, ra) };
        self.parent[small] = big;
        if self.rank[big] == self.rank[small] {
            self.rank[big] += 1;
        }
    }
}

/// One selected link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub row: usize,
    pub col: usize,
    pub cost: f64,
}

// ============================================================================
// LAP SOLVER
// ============================================================================

/// Solves the LAP over `links` and returns the chosen links ordered by row.
///
/// Unlinked rows and columns are simply absent from the result. Rows and
/// columns without any allowed link never enter a sub-problem. The
/// alternative cost comes from the largest cost over all links, so splitting
/// into components does not change the optimum.
pub fn solve_links(links: &LinkCosts) -> Vec<Assignment> {
    if links.allowed_count() == 0 {
        return Vec::new();
    }

    let max_cost = links.links.values().copied().fold(f64::MIN, f64::max);
    let min_cost = links.links.values().copied().fold(f64::MAX, f64::min);
    let alternative = if max_cost > 0.0 {
        ALTERNATIVE_COST_FACTOR * max_cost
    } else {
        1.0
    };

    let mut result: Vec<Assignment> = links
        .components()
        .iter()
        .flat_map(|component| solve_component(links, component, alternative, min_cost))
        .collect();
    result.sort_by_key(|a| a.row);
    result
}

/// Dense Jaqaman layout over one component.
fn solve_component(links: &LinkCosts, component: &Component, alternative: f64, min_cost: f64) -> Vec<Assignment> {
    let rows: Vec<usize> = component.rows.iter().copied().collect();
    let cols: Vec<usize> = component.cols.iter().copied().collect();
    let col_index: BTreeMap<usize, usize> = cols.iter().enumerate().map(|(j, &col)| (col, j)).collect();
    let (n, m) = (rows.len(), cols.len());

    // Never chosen: an all-alternative solution is always cheaper.
    let blocked = alternative * (n + m + 1) as f64 * 10.0 + 1.0;

    let size = n + m;
    let mut matrix = vec![vec![blocked; size]; size];
    for (i, &row) in rows.iter().enumerate() {
        for (col, cost) in links.row_links(row) {
            let j = col_index[&col];
            matrix[i][j] = cost;
            matrix[n + j][m + i] = min_cost;
        }
        matrix[i][m + i] = alternative;
    }
    for j in 0..m {
        matrix[n + j][j] = alternative;
    }

    hungarian(&matrix)
        .into_iter()
        .filter(|&(i, j)| i < n && j < m)
        .filter_map(|(i, j)| {
            let (row, col) = (rows[i], cols[j]);
            links.get(row, col).map(|cost| Assignment { row, col, cost })
        })
        .collect()
}

// ============================================================================
// HUNGARIAN
// ============================================================================

/// Minimum-cost assignment on a (possibly rectangular) cost matrix.
///
/// Returns `min(rows, cols)` pairs `(row, col)` ordered by row. Classical
/// O(n³) Kuhn-Munkres with row/column potentials; non-square inputs are
/// padded with a large sentinel that is stripped from the result.
pub fn hungarian(cost_matrix: &[Vec<f64>]) -> Vec<(usize, usize)> {
    if cost_matrix.is_empty() {
        return vec![];
    }
    let n_rows = cost_matrix.len();
    let n_cols = cost_matrix[0].len();
    if n_cols == 0 {
        return vec![];
    }

    let n = n_rows.max(n_cols);
    let inf = f64::MAX / 2.0;

    let padding = cost_matrix
        .iter()
        .flatten()
        .fold(0.0_f64, |acc, c| acc.max(c.abs()))
        * 2.0
        + 1.0;
    let mut c = vec![vec![padding; n]; n];
    for (i, row) in cost_matrix.iter().enumerate() {
        for (j, &value) in row.iter().enumerate().take(n_cols) {
            c[i][j] = value;
        }
    }

    // u[i]: row potentials, v[j]: column potentials (1-indexed, 0 = dummy)
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    // p[j]: row assigned to column j (1-indexed, 0 = free)
    let mut p = vec![0_usize; n + 1];
    let mut way = vec![0_usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0_usize;
        let mut min_val = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0_usize;

            for j in 1..=n {
                if !used[j] {
                    let val = c[i0 - 1][j - 1] - u[i0] - v[j];
                    if val < min_val[j] {
                        min_val[j] = val;
                        way[j] = j0;
                    }
                    if min_val[j] < delta {
                        delta = min_val[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_val[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment along the path
        loop {
            p[j0] = p[way[j0]];
            j0 = way[j0];
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignments = Vec::new();
    for j in 1..=n {
        if p[j] != 0 {
            let row = p[j] - 1;
            let col = j - 1;
            if row < n_rows && col < n_cols {
                assignments.push((row, col));
            }
        }
    }
    assignments.sort_unstable_by_key(|&(row, _)| row);
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_cost(matrix: &[Vec<f64>], pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(r, c)| matrix[r][c]).sum()
    }

    #[test]
    fn test_hungarian_identity() {
        let cost = vec![vec![1.0, 10.0], vec![10.0, 1.0]];
        assert_eq!(hungarian(&cost), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_hungarian_swapped() {
        let cost = vec![vec![10.0, 1.0], vec![1.0, 10.0]];
        assert_eq!(hungarian(&cost), vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_hungarian_finds_global_optimum() {
        // Greedy picks (0,0)=1 then (1,1)=100; optimum is 2 + 3 = 5.
        let cost = vec![vec![1.0, 2.0], vec![3.0, 100.0]];
        let pairs = hungarian(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
        assert_eq!(total_cost(&cost, &pairs), 5.0);
    }

    #[test]
    fn test_hungarian_rectangular() {
        let cost = vec![vec![5.0, 1.0, 9.0]];
        assert_eq!(hungarian(&cost), vec![(0, 1)]);

        let tall = vec![vec![4.0], vec![2.0], vec![8.0]];
        assert_eq!(hungarian(&tall), vec![(1, 0)]);
    }

    #[test]
    fn test_hungarian_empty() {
        assert!(hungarian(&[]).is_empty());
        assert!(hungarian(&[vec![]]).is_empty());
    }

    #[test]
    fn test_solve_links_respects_forbidden() {
        let mut links = LinkCosts::new(2, 2);
        links.allow(0, 0, 4.0);
        // Row 1 and column 1 have no allowed link
        let result = solve_links(&links);
        assert_eq!(result, vec![Assignment { row: 0, col: 0, cost: 4.0 }]);
    }

    #[test]
    fn test_solve_links_competition_prefers_total_minimum() {
        // Two sources both near target 0; source 1 also reaches target 1.
        let mut links = LinkCosts::new(2, 2);
        links.allow(0, 0, 1.0);
        links.allow(1, 0, 2.0);
        links.allow(1, 1, 3.0);
        let result = solve_links(&links);
        assert_eq!(
            result,
            vec![
                Assignment { row: 0, col: 0, cost: 1.0 },
                Assignment { row: 1, col: 1, cost: 3.0 },
            ]
        );
    }

    #[test]
    fn test_solve_links_one_target_two_sources() {
        let mut links = LinkCosts::new(2, 1);
        links.allow(0, 0, 9.0);
        links.allow(1, 0, 1.0);
        let result = solve_links(&links);
        assert_eq!(result, vec![Assignment { row: 1, col: 0, cost: 1.0 }]);
    }

    #[test]
    fn test_solve_links_nothing_allowed() {
        let links = LinkCosts::new(3, 3);
        assert!(solve_links(&links).is_empty());
        assert!(solve_links(&LinkCosts::new(0, 4)).is_empty());
    }

    #[test]
    fn test_solve_links_maps_back_sparse_indices() {
        let mut links = LinkCosts::new(4, 5);
        links.allow(3, 4, 2.0);
        links.allow(1, 2, 1.0);
        let result = solve_links(&links);
        assert_eq!(
            result,
            vec![
                Assignment { row: 1, col: 2, cost: 1.0 },
                Assignment { row: 3, col: 4, cost: 2.0 },
            ]
        );
    }

    #[test]
    fn test_components_split_independent_links() {
        let mut links = LinkCosts::new(3, 4);
        links.allow(0, 1, 1.0);
        links.allow(2, 1, 2.0);
        links.allow(2, 3, 3.0);
        links.allow(1, 0, 0.5);

        let components = links.components();
        assert_eq!(components.len(), 2);
        let shapes: Vec<(Vec<usize>, Vec<usize>)> = components
            .iter()
            .map(|c| (c.rows.iter().copied().collect(), c.cols.iter().copied().collect()))
            .collect();
        assert!(shapes.contains(&(vec![0, 2], vec![1, 3])));
        assert!(shapes.contains(&(vec![1], vec![0])));

        assert_eq!(
            solve_links(&links),
            vec![
                Assignment { row: 0, col: 1, cost: 1.0 },
                Assignment { row: 1, col: 0, cost: 0.5 },
                Assignment { row: 2, col: 3, cost: 3.0 },
            ]
        );
    }

    #[test]
    fn test_solve_links_many_disjoint_pairs() {
        // A dense layout would need a 40 000 x 40 000 matrix
        let n = 20_000;
        let mut links = LinkCosts::new(n, n);
        for row in 0..n {
            links.allow(row, n - 1 - row, 1.0 + (row % 7) as f64);
        }
        let result = solve_links(&links);
        assert_eq!(result.len(), n);
        assert!(result.iter().enumerate().all(|(i, a)| a.row == i && a.col == n - 1 - i));
    }

    #[test]
    fn test_solve_links_zero_costs_still_link() {
        let mut links = LinkCosts::new(1, 1);
        links.allow(0, 0, 0.0);
        assert_eq!(solve_links(&links).len(), 1);
    }
}
