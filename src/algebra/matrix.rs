//! Sparse matrix with a pending-update buffer.
//!
//! Storage is row-major ordered maps, so iteration over a row (and over
//! the whole matrix) yields entries in ascending index order — the
//! traversal operators rely on that for their tie-break guarantee.

use std::collections::BTreeMap;

/// A staged mutation: `Some(v)` is an insert/overwrite, `None` a delete.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Pending<T> {
    pub row: u64,
    pub col: u64,
    pub val: Option<T>,
}

/// Sparse 2-D matrix over `u64` indices.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrix<T> {
    nrows: u64,
    ncols: u64,
    rows: BTreeMap<u64, BTreeMap<u64, T>>,
    nvals: u64,
    pending: Vec<Pending<T>>,
}

impl<T: Copy + PartialEq> SparseMatrix<T> {
    /// Empty matrix of the given dimensions.
    pub fn new(nrows: u64, ncols: u64) -> Self {
        Self {
            nrows,
            ncols,
            rows: BTreeMap::new(),
            nvals: 0,
            pending: Vec::new(),
        }
    }

    pub fn nrows(&self) -> u64 {
        self.nrows
    }

    pub fn ncols(&self) -> u64 {
        self.ncols
    }

    /// Number of materialised entries. Pending entries are not counted
    /// until [`wait`](Self::wait) runs.
    pub fn nvals(&self) -> u64 {
        self.nvals
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Grow the matrix. Dimensions only ever increase; entries are kept.
    pub fn resize(&mut self, nrows: u64, ncols: u64) {
        debug_assert!(nrows >= self.nrows && ncols >= self.ncols);
        self.nrows = nrows;
        self.ncols = ncols;
    }

    /// Stage `M[i,j] = v`.
    pub fn set(&mut self, i: u64, j: u64, v: T) {
        debug_assert!(i < self.nrows && j < self.ncols);
        self.pending.push(Pending { row: i, col: j, val: Some(v) });
    }

    /// Stage deletion of `M[i,j]`.
    pub fn remove(&mut self, i: u64, j: u64) {
        self.pending.push(Pending { row: i, col: j, val: None });
    }

    /// Point lookup including the pending buffer: the latest staged
    /// mutation for (i, j) wins over the materialised entry.
    pub fn get(&self, i: u64, j: u64) -> Option<T> {
        for p in self.pending.iter().rev() {
            if p.row == i && p.col == j {
                return p.val;
            }
        }
        self.get_materialised(i, j)
    }

    /// Point lookup ignoring the pending buffer — the snapshot a
    /// concurrent reader observes.
    pub fn get_materialised(&self, i: u64, j: u64) -> Option<T> {
        self.rows.get(&i).and_then(|r| r.get(&j)).copied()
    }

    /// Apply every staged mutation, in order, then clear the buffer.
    /// After return the matrix is fully materialised.
    pub fn wait(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            match p.val {
                Some(v) => {
                    let row = self.rows.entry(p.row).or_default();
                    if row.insert(p.col, v).is_none() {
                        self.nvals += 1;
                    }
                }
                None => {
                    if let Some(row) = self.rows.get_mut(&p.row) {
                        if row.remove(&p.col).is_some() {
                            self.nvals -= 1;
                        }
                        if row.is_empty() {
                            self.rows.remove(&p.row);
                        }
                    }
                }
            }
        }
    }

    /// Discard the pending buffer without materialising it.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Staged mutations in order: `(row, col, Some(v))` for inserts,
    /// `(row, col, None)` for deletes. Readers that must reconcile
    /// their own staged writes replay these over the materialised view.
    pub fn pending_ops(&self) -> impl Iterator<Item = (u64, u64, Option<T>)> + '_ {
        self.pending.iter().map(|p| (p.row, p.col, p.val))
    }

    /// Drop all materialised entries (dimensions are kept).
    pub fn clear(&mut self) {
        self.rows.clear();
        self.nvals = 0;
        self.pending.clear();
    }

    /// Iterate materialised entries of row `i` in ascending column order.
    pub fn row_iter(&self, i: u64) -> impl Iterator<Item = (u64, T)> + '_ {
        self.rows
            .get(&i)
            .into_iter()
            .flat_map(|r| r.iter().map(|(&j, &v)| (j, v)))
    }

    /// Iterate all materialised entries in (row, col) ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, T)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&i, r)| r.iter().map(move |(&j, &v)| (i, j, v)))
    }

    /// Row indices that hold at least one materialised entry.
    pub fn nonempty_rows(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    /// Stage clearing of every materialised entry in row `i`.
    pub fn remove_row(&mut self, i: u64) {
        let cols: Vec<u64> = self.row_iter(i).map(|(j, _)| j).collect();
        for j in cols {
            self.remove(i, j);
        }
    }

    /// Stage clearing of every materialised entry in column `j`.
    pub fn remove_col(&mut self, j: u64) {
        let rows: Vec<u64> = self
            .rows
            .iter()
            .filter(|(_, r)| r.contains_key(&j))
            .map(|(&i, _)| i)
            .collect();
        for i in rows {
            self.remove(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_pending_until_wait() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(8, 8);
        m.set(1, 2, true);
        assert_eq!(m.nvals(), 0);
        assert_eq!(m.get(1, 2), Some(true));
        assert_eq!(m.get_materialised(1, 2), None);

        m.wait();
        assert_eq!(m.nvals(), 1);
        assert_eq!(m.get_materialised(1, 2), Some(true));
    }

    #[test]
    fn test_latest_pending_wins() {
        let mut m: SparseMatrix<i64> = SparseMatrix::new(4, 4);
        m.set(0, 0, 1);
        m.set(0, 0, 2);
        m.remove(0, 0);
        assert_eq!(m.get(0, 0), None);
        m.set(0, 0, 3);
        assert_eq!(m.get(0, 0), Some(3));
        m.wait();
        assert_eq!(m.nvals(), 1);
        assert_eq!(m.get(0, 0), Some(3));
    }

    #[test]
    fn test_wait_idempotent() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        m.set(2, 3, true);
        m.wait();
        let nvals = m.nvals();
        m.wait();
        assert_eq!(m.nvals(), nvals);
    }

    #[test]
    fn test_remove_row_and_col() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(4, 4);
        m.set(1, 0, true);
        m.set(1, 3, true);
        m.set(2, 3, true);
        m.wait();

        m.remove_row(1);
        m.remove_col(3);
        m.wait();
        assert_eq!(m.nvals(), 0);
    }

    #[test]
    fn test_row_iter_ascending() {
        let mut m: SparseMatrix<bool> = SparseMatrix::new(8, 8);
        m.set(0, 5, true);
        m.set(0, 1, true);
        m.set(0, 3, true);
        m.wait();
        let cols: Vec<u64> = m.row_iter(0).map(|(j, _)| j).collect();
        assert_eq!(cols, vec![1, 3, 5]);
    }
}
