//! Minimum-cost bipartite assignment (Hungarian / Kuhn–Munkres, O(m³)).
//!
//! Shortest augmenting path formulation with row and column potentials.
//! Rows are inserted in ascending order; when several columns share the
//! smallest reduced cost the lowest column index is taken. Given the same
//! cost matrix the solver therefore always returns the same assignment,
//! independent of platform or thread count.

/// Dense, square, row-major cost matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CostMatrix {
    pub fn zeros(n: usize) -> Self {
        CostMatrix {
            n,
            data: vec![0.0; n * n],
        }
    }

    /// Build an `n × n` matrix from `cost(row, col)`.
    pub fn from_fn(n: usize, mut cost: impl FnMut(usize, usize) -> f64) -> Self {
        let mut m = Self::zeros(n);
        m.fill(n, &mut cost);
        m
    }

    /// Resize to `n × n` (reusing the allocation) and fill from `cost(row, col)`.
    pub fn fill(&mut self, n: usize, mut cost: impl FnMut(usize, usize) -> f64) {
        self.n = n;
        self.data.clear();
        self.data.reserve(n * n);
        for row in 0..n {
            for col in 0..n {
                self.data.push(cost(row, col));
            }
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|c| c.is_finite())
    }

    /// Total cost of a row → column assignment.
    pub fn total_cost(&self, assignment: &[usize]) -> f64 {
        assignment
            .iter()
            .enumerate()
            .map(|(row, &col)| self.get(row, col))
            .sum()
    }
}

/// Reusable solver state; buffers grow to the largest matrix seen.
#[derive(Debug, Default, Clone)]
pub struct Hungarian {
    u: Vec<f64>,
    v: Vec<f64>,
    col_owner: Vec<usize>,
    way: Vec<usize>,
    min_reduced: Vec<f64>,
    used: Vec<bool>,
}

impl Hungarian {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, n: usize) {
        self.u.clear();
        self.u.resize(n + 1, 0.0);
        self.v.clear();
        self.v.resize(n + 1, 0.0);
        self.col_owner.clear();
        self.col_owner.resize(n + 1, 0);
        self.way.clear();
        self.way.resize(n + 1, 0);
    }

    /// Solve the assignment problem.
    ///
    /// Arguments
    /// -----------------
    /// * `cost`: square cost matrix, rows are assigned to columns.
    ///
    /// Return
    /// ----------
    /// * `Some(assignment)` with `assignment[row] = col`, a permutation of `0..n`.
    /// * `None` if the matrix holds a non-finite cost (degenerate problem).
    pub fn solve(&mut self, cost: &CostMatrix) -> Option<Vec<usize>> {
        let n = cost.size();
        if n == 0 {
            return Some(Vec::new());
        }
        if !cost.is_finite() {
            return None;
        }
        self.reset(n);

        // 1-based indices; column 0 is the virtual source of each augmenting path.
        for row in 1..=n {
            self.col_owner[0] = row;
            let mut j0 = 0usize;
            self.min_reduced.clear();
            self.min_reduced.resize(n + 1, f64::INFINITY);
            self.used.clear();
            self.used.resize(n + 1, false);

            loop {
                self.used[j0] = true;
                let i0 = self.col_owner[j0];
                let mut delta = f64::INFINITY;
                let mut j1 = 0usize;

                for j in 1..=n {
                    if self.used[j] {
                        continue;
                    }
                    let reduced = cost.get(i0 - 1, j - 1) - self.u[i0] - self.v[j];
                    if reduced < self.min_reduced[j] {
                        self.min_reduced[j] = reduced;
                        self.way[j] = j0;
                    }
                    if self.min_reduced[j] < delta {
                        delta = self.min_reduced[j];
                        j1 = j;
                    }
                }

                // all reduced costs finite, so some free column was found
                if j1 == 0 {
                    return None;
                }

                for j in 0..=n {
                    if self.used[j] {
                        self.u[self.col_owner[j]] += delta;
                        self.v[j] -= delta;
                    } else {
                        self.min_reduced[j] -= delta;
                    }
                }

                j0 = j1;
                if self.col_owner[j0] == 0 {
                    break;
                }
            }

            // augment along the alternating path
            loop {
                let j1 = self.way[j0];
                self.col_owner[j0] = self.col_owner[j1];
                j0 = j1;
                if j0 == 0 {
                    break;
                }
            }
        }

        let mut assignment = vec![0usize; n];
        for j in 1..=n {
            assignment[self.col_owner[j] - 1] = j - 1;
        }
        Some(assignment)
    }
}
