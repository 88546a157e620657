//! # Property Graph Model
//!
//! The data types that cross every boundary: storage ↔ planner ↔
//! operators ↔ result set. This module is pure data — no I/O, no locks,
//! no matrix state.

pub mod node;
pub mod edge;
pub mod path;
pub mod value;
pub mod props;

pub use node::{Node, NodeId};
pub use edge::{Direction, Edge, EdgeId};
pub use path::PathValue;
pub use props::PropertyBag;
pub use value::{IsoDuration, Value};

use serde::{Deserialize, Serialize};

/// Sentinel for "no such entity".
pub const INVALID_ID: u64 = u64::MAX;

/// Dense label identifier, assigned at first use and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelId(pub u32);

/// Dense relationship-type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelTypeId(pub u32);

/// Dense attribute (property-name) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttrId(pub u32);

impl std::fmt::Display for LabelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RelTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for AttrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
