//! # Abstract Sparse Algebra
//!
//! A narrow, semiring-parameterised sparse linear algebra over matrices
//! and vectors indexed by `u64`. The graph layer and the traversal
//! operators depend on exactly this surface; any backend providing the
//! same semantics could replace it.
//!
//! Mutations staged through [`SparseMatrix::set`] / [`SparseMatrix::remove`]
//! are buffered as pending entries. [`SparseMatrix::get`] always returns
//! the post-pending view; [`SparseMatrix::wait`] materialises the buffer
//! atomically. There is exactly one generic kernel per operation —
//! specialisation is a backend concern, never a caller concern.

pub mod descriptor;
pub mod matrix;
pub mod ops;
pub mod semiring;
pub mod vector;

pub use descriptor::Descriptor;
pub use matrix::SparseMatrix;
pub use ops::{apply, assign, emult, extract, mxm, mxv, transpose, IndexSel};
pub use semiring::{AnyFirstI64, AnyPairBool, LorLandBool, MinPlusF64, Semiring};
pub use vector::SparseVector;
