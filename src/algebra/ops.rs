//! Generic kernels over the sparse types.
//!
//! Every kernel reads the materialised view of its inputs; callers that
//! need staged entries reconcile through the pending accessors on
//! [`SparseMatrix`]. Output indices follow the GraphBLAS convention:
//! an index selection maps the chosen rows/columns onto `0..len`.

use super::descriptor::Descriptor;
use super::matrix::SparseMatrix;
use super::semiring::Semiring;
use super::vector::SparseVector;

/// Row/column selection for extract and assign.
#[derive(Debug, Clone)]
pub enum IndexSel {
    /// Every index, identity-mapped.
    All,
    /// An explicit index list, position-mapped.
    List(Vec<u64>),
}

impl IndexSel {
    fn resolve(&self, dim: u64) -> Vec<u64> {
        match self {
            IndexSel::All => (0..dim).collect(),
            IndexSel::List(v) => v.clone(),
        }
    }
}

fn mask_allows(
    mask: Option<&SparseMatrix<bool>>,
    desc: Descriptor,
    i: u64,
    j: u64,
) -> bool {
    let Some(m) = mask else {
        return true;
    };
    let hit = match m.get_materialised(i, j) {
        Some(v) => desc.structural_mask || v,
        None => false,
    };
    if desc.complement_mask {
        !hit
    } else {
        hit
    }
}

fn mask_allows_vec(
    mask: Option<&SparseVector<bool>>,
    desc: Descriptor,
    i: u64,
) -> bool {
    let Some(m) = mask else {
        return true;
    };
    let hit = match m.get(i) {
        Some(v) => desc.structural_mask || v,
        None => false,
    };
    if desc.complement_mask {
        !hit
    } else {
        hit
    }
}

fn effective<T: Copy + PartialEq>(
    m: &SparseMatrix<T>,
    transposed: bool,
) -> SparseMatrix<T> {
    if !transposed {
        return m.clone();
    }
    let mut t = SparseMatrix::new(m.ncols(), m.nrows());
    for (i, j, v) in m.iter() {
        t.set(j, i, v);
    }
    t.wait();
    t
}

/// `C <mask>= acc(C, A ⊗ B)` over the given semiring.
#[allow(clippy::too_many_arguments)]
pub fn mxm<A, B, C, S>(
    c: &mut SparseMatrix<C>,
    mask: Option<&SparseMatrix<bool>>,
    acc: Option<fn(C, C) -> C>,
    a: &SparseMatrix<A>,
    b: &SparseMatrix<B>,
    semiring: &S,
    desc: Descriptor,
) where
    A: Copy + PartialEq,
    B: Copy + PartialEq,
    C: Copy + PartialEq,
    S: Semiring<A, B, C>,
{
    let a = effective(a, desc.transpose_a);
    let b = effective(b, desc.transpose_b);
    if desc.replace {
        c.clear();
    }

    // Row-major saxpy: C[i,:] = ⊕_k A[i,k] ⊗ B[k,:]
    for i in a.nonempty_rows().collect::<Vec<_>>() {
        let mut row_acc: std::collections::BTreeMap<u64, C> = std::collections::BTreeMap::new();
        for (k, av) in a.row_iter(i) {
            for (j, bv) in b.row_iter(k) {
                let prod = semiring.multiply(av, bv);
                row_acc
                    .entry(j)
                    .and_modify(|e| *e = semiring.add(*e, prod))
                    .or_insert(prod);
            }
        }
        for (j, v) in row_acc {
            if !mask_allows(mask, desc, i, j) {
                continue;
            }
            let out = match (acc, c.get_materialised(i, j)) {
                (Some(f), Some(old)) => f(old, v),
                _ => v,
            };
            c.set(i, j, out);
        }
    }
    c.wait();
}

/// `w <mask>= acc(w, A ⊗ u)` — matrix × column-vector.
#[allow(clippy::too_many_arguments)]
pub fn mxv<A, B, C, S>(
    w: &mut SparseVector<C>,
    mask: Option<&SparseVector<bool>>,
    acc: Option<fn(C, C) -> C>,
    a: &SparseMatrix<A>,
    u: &SparseVector<B>,
    semiring: &S,
    desc: Descriptor,
) where
    A: Copy + PartialEq,
    B: Copy + PartialEq,
    C: Copy + PartialEq,
    S: Semiring<A, B, C>,
{
    if desc.replace {
        w.clear();
    }
    let mut out: std::collections::BTreeMap<u64, C> = std::collections::BTreeMap::new();

    if desc.transpose_a {
        // w[j] = ⊕_i A[i,j] ⊗ u[i]; driven by u's nonzeros, which keeps
        // the common unit-vector traversal a single row scan.
        for (i, uv) in u.iter() {
            for (j, av) in a.row_iter(i) {
                let prod = semiring.multiply(av, uv);
                out.entry(j)
                    .and_modify(|e| *e = semiring.add(*e, prod))
                    .or_insert(prod);
            }
        }
    } else {
        // w[i] = ⊕_j A[i,j] ⊗ u[j]
        for i in a.nonempty_rows().collect::<Vec<_>>() {
            let mut acc_v: Option<C> = None;
            for (j, av) in a.row_iter(i) {
                if let Some(uv) = u.get(j) {
                    let prod = semiring.multiply(av, uv);
                    acc_v = Some(match acc_v {
                        Some(e) => semiring.add(e, prod),
                        None => prod,
                    });
                }
            }
            if let Some(v) = acc_v {
                out.insert(i, v);
            }
        }
    }

    for (i, v) in out {
        if !mask_allows_vec(mask, desc, i) {
            continue;
        }
        let merged = match (acc, w.get(i)) {
            (Some(f), Some(old)) => f(old, v),
            _ => v,
        };
        w.set(i, merged);
    }
}

/// Element-wise multiply: `C <mask>= A .* B` under `op`, on the entry
/// intersection.
pub fn emult<A, B, C>(
    c: &mut SparseMatrix<C>,
    mask: Option<&SparseMatrix<bool>>,
    a: &SparseMatrix<A>,
    b: &SparseMatrix<B>,
    op: fn(A, B) -> C,
    desc: Descriptor,
) where
    A: Copy + PartialEq,
    B: Copy + PartialEq,
    C: Copy + PartialEq,
{
    if desc.replace {
        c.clear();
    }
    for (i, j, av) in a.iter() {
        if let Some(bv) = b.get_materialised(i, j) {
            if mask_allows(mask, desc, i, j) {
                c.set(i, j, op(av, bv));
            }
        }
    }
    c.wait();
}

/// Submatrix extract: `C <mask>= A[rows, cols]`.
pub fn extract<T: Copy + PartialEq>(
    c: &mut SparseMatrix<T>,
    mask: Option<&SparseMatrix<bool>>,
    a: &SparseMatrix<T>,
    rows: &IndexSel,
    cols: &IndexSel,
    desc: Descriptor,
) {
    let a = effective(a, desc.transpose_a);
    if desc.replace {
        c.clear();
    }
    let row_ids = rows.resolve(a.nrows());
    let col_ids = cols.resolve(a.ncols());
    let col_pos: std::collections::BTreeMap<u64, u64> = col_ids
        .iter()
        .enumerate()
        .map(|(p, &j)| (j, p as u64))
        .collect();

    for (out_i, &i) in row_ids.iter().enumerate() {
        for (j, v) in a.row_iter(i) {
            if let Some(&out_j) = col_pos.get(&j) {
                if mask_allows(mask, desc, out_i as u64, out_j) {
                    c.set(out_i as u64, out_j, v);
                }
            }
        }
    }
    c.wait();
}

/// Apply a scalar function to every entry: `C <mask>= f(A)`.
pub fn apply<A, C>(
    c: &mut SparseMatrix<C>,
    mask: Option<&SparseMatrix<bool>>,
    a: &SparseMatrix<A>,
    unary: fn(A) -> C,
    desc: Descriptor,
) where
    A: Copy + PartialEq,
    C: Copy + PartialEq,
{
    if desc.replace {
        c.clear();
    }
    for (i, j, v) in a.iter() {
        if mask_allows(mask, desc, i, j) {
            c.set(i, j, unary(v));
        }
    }
    c.wait();
}

/// `C <mask>= Aᵀ`.
pub fn transpose<T: Copy + PartialEq>(
    c: &mut SparseMatrix<T>,
    mask: Option<&SparseMatrix<bool>>,
    a: &SparseMatrix<T>,
    desc: Descriptor,
) {
    if desc.replace {
        c.clear();
    }
    for (i, j, v) in a.iter() {
        if mask_allows(mask, desc, j, i) {
            c.set(j, i, v);
        }
    }
    c.wait();
}

/// Scalar assign: `C[rows, cols] <mask>= value`.
pub fn assign<T: Copy + PartialEq>(
    c: &mut SparseMatrix<T>,
    mask: Option<&SparseMatrix<bool>>,
    value: T,
    rows: &IndexSel,
    cols: &IndexSel,
    desc: Descriptor,
) {
    let row_ids = rows.resolve(c.nrows());
    let col_ids = cols.resolve(c.ncols());
    for &i in &row_ids {
        for &j in &col_ids {
            if mask_allows(mask, desc, i, j) {
                c.set(i, j, value);
            }
        }
    }
    c.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::semiring::{AnyPairBool, MinPlusF64};

    fn bool_matrix(dim: u64, entries: &[(u64, u64)]) -> SparseMatrix<bool> {
        let mut m = SparseMatrix::new(dim, dim);
        for &(i, j) in entries {
            m.set(i, j, true);
        }
        m.wait();
        m
    }

    #[test]
    fn test_boolean_mxm_reachability() {
        // 0 -> 1 -> 2
        let a = bool_matrix(4, &[(0, 1), (1, 2)]);
        let mut c = SparseMatrix::new(4, 4);
        mxm(&mut c, None, None, &a, &a, &AnyPairBool, Descriptor::new());
        // Two-hop paths: 0 -> 2 only.
        assert_eq!(c.nvals(), 1);
        assert_eq!(c.get(0, 2), Some(true));
    }

    #[test]
    fn test_mxv_pulls_out_neighbours() {
        let a = bool_matrix(4, &[(0, 1), (0, 2), (3, 0)]);
        let u = SparseVector::unit(4, 0, true);
        let mut w = SparseVector::new(4);
        mxv(&mut w, None, None, &a, &u, &AnyPairBool, Descriptor::new().transpose_a());
        // Outgoing neighbours of node 0, ascending.
        let hits: Vec<u64> = w.iter().map(|(i, _)| i).collect();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn test_mxv_incoming_without_transpose() {
        let a = bool_matrix(4, &[(0, 1), (3, 1)]);
        let u = SparseVector::unit(4, 1, true);
        let mut w = SparseVector::new(4);
        mxv(&mut w, None, None, &a, &u, &AnyPairBool, Descriptor::new());
        // Sources with an edge into node 1.
        let hits: Vec<u64> = w.iter().map(|(i, _)| i).collect();
        assert_eq!(hits, vec![0, 3]);
    }

    #[test]
    fn test_complement_mask_prunes_visited() {
        let a = bool_matrix(4, &[(0, 1), (0, 2)]);
        let u = SparseVector::unit(4, 0, true);
        let mut visited = SparseVector::new(4);
        visited.set(1, true);
        let mut w = SparseVector::new(4);
        mxv(
            &mut w,
            Some(&visited),
            None,
            &a,
            &u,
            &AnyPairBool,
            Descriptor::new().transpose_a().complement_mask(),
        );
        let hits: Vec<u64> = w.iter().map(|(i, _)| i).collect();
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn test_min_plus_mxv() {
        let mut a: SparseMatrix<f64> = SparseMatrix::new(3, 3);
        a.set(0, 1, 2.0);
        a.set(1, 2, 3.0);
        a.set(0, 2, 10.0);
        a.wait();
        let mut dist = SparseVector::unit(3, 0, 0.0);
        let mut next = SparseVector::new(3);
        mxv(&mut next, None, None, &a, &dist, &MinPlusF64, Descriptor::new().transpose_a());
        assert_eq!(next.get(1), Some(2.0));
        assert_eq!(next.get(2), Some(10.0));
        // Relax once more from node 1.
        dist = next.clone();
        mxv(
            &mut next,
            None,
            Some(|a: f64, b: f64| a.min(b)),
            &a,
            &dist,
            &MinPlusF64,
            Descriptor::new().transpose_a(),
        );
        assert_eq!(next.get(2), Some(5.0));
    }

    #[test]
    fn test_emult_intersection() {
        let a = bool_matrix(4, &[(0, 0), (1, 1), (2, 2)]);
        let b = bool_matrix(4, &[(1, 1), (2, 2), (3, 3)]);
        let mut c = SparseMatrix::new(4, 4);
        emult(&mut c, None, &a, &b, |x: bool, y: bool| x && y, Descriptor::new());
        assert_eq!(c.nvals(), 2);
        assert!(c.get(1, 1).is_some() && c.get(2, 2).is_some());
    }

    #[test]
    fn test_transpose_round_trip() {
        let a = bool_matrix(4, &[(0, 1), (2, 3)]);
        let mut t = SparseMatrix::new(4, 4);
        transpose(&mut t, None, &a, Descriptor::new());
        assert_eq!(t.get(1, 0), Some(true));
        assert_eq!(t.get(3, 2), Some(true));
        let mut back = SparseMatrix::new(4, 4);
        transpose(&mut back, None, &t, Descriptor::new());
        assert_eq!(back.nvals(), a.nvals());
    }

    #[test]
    fn test_extract_position_maps() {
        let a = bool_matrix(4, &[(1, 2), (3, 2)]);
        let mut c = SparseMatrix::new(2, 1);
        extract(
            &mut c,
            None,
            &a,
            &IndexSel::List(vec![1, 3]),
            &IndexSel::List(vec![2]),
            Descriptor::new(),
        );
        assert_eq!(c.get(0, 0), Some(true));
        assert_eq!(c.get(1, 0), Some(true));
    }

    #[test]
    fn test_assign_scalar_with_replace() {
        let mut c = bool_matrix(3, &[(0, 0)]);
        assign(
            &mut c,
            None,
            true,
            &IndexSel::List(vec![1, 2]),
            &IndexSel::List(vec![1, 2]),
            Descriptor::new(),
        );
        assert_eq!(c.nvals(), 5);
    }
}
