//! # Hexastore
//!
//! A lex-ordered triplet index storing all six permutations of every
//! `(subject, predicate, object)` edge triplet, where the predicate is
//! the pair `(relation type, edge id)`. Any lookup pattern with a bound
//! subset of {S, P, O} becomes a prefix range scan over the index whose
//! component order starts with the bound components.
//!
//! Numeric components are encoded big-endian fixed-width so byte order
//! matches numeric order.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::model::{EdgeId, NodeId, RelTypeId};

/// One index permutation. The tag byte leads every key, so the six
/// indices share a single ordered set without interleaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Perm {
    Spo = 0,
    Sop = 1,
    Pso = 2,
    Pos = 3,
    Osp = 4,
    Ops = 5,
}

const ALL_PERMS: [Perm; 6] = [Perm::Spo, Perm::Sop, Perm::Pso, Perm::Pos, Perm::Osp, Perm::Ops];

/// A fully-bound edge triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub subject: NodeId,
    pub rel_type: RelTypeId,
    pub edge: EdgeId,
    pub object: NodeId,
}

/// A scan pattern: any subset of {subject, predicate, object} bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripletPattern {
    pub subject: Option<NodeId>,
    pub rel_type: Option<RelTypeId>,
    pub object: Option<NodeId>,
}

impl TripletPattern {
    pub fn subject(s: NodeId) -> Self {
        Self { subject: Some(s), ..Default::default() }
    }

    pub fn object(o: NodeId) -> Self {
        Self { object: Some(o), ..Default::default() }
    }
}

impl Perm {
    /// Component order of this permutation, with the predicate expanded
    /// to its (type, edge) encoding in place.
    fn components(self, t: &Triplet) -> [u64; 4] {
        let (s, p, e, o) = (t.subject.0, t.rel_type.0 as u64, t.edge.0, t.object.0);
        match self {
            Perm::Spo => [s, p, e, o],
            Perm::Sop => [s, o, p, e],
            Perm::Pso => [p, e, s, o],
            Perm::Pos => [p, e, o, s],
            Perm::Osp => [o, s, p, e],
            Perm::Ops => [o, p, e, s],
        }
    }

    fn decode(self, parts: [u64; 4]) -> Triplet {
        let [a, b, c, d] = parts;
        let (s, p, e, o) = match self {
            Perm::Spo => (a, b, c, d),
            Perm::Sop => (a, c, d, b),
            Perm::Pso => (c, a, b, d),
            Perm::Pos => (d, a, b, c),
            Perm::Osp => (b, c, d, a),
            Perm::Ops => (d, b, c, a),
        };
        Triplet {
            subject: NodeId(s),
            rel_type: RelTypeId(p as u32),
            edge: EdgeId(e),
            object: NodeId(o),
        }
    }
}

fn encode(perm: Perm, t: &Triplet) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(perm as u8);
    for c in perm.components(t) {
        key.extend_from_slice(&c.to_be_bytes());
    }
    key
}

fn decode(key: &[u8]) -> Triplet {
    let perm = match key[0] {
        0 => Perm::Spo,
        1 => Perm::Sop,
        2 => Perm::Pso,
        3 => Perm::Pos,
        4 => Perm::Osp,
        _ => Perm::Ops,
    };
    let mut parts = [0u64; 4];
    for (n, part) in parts.iter_mut().enumerate() {
        let start = 1 + n * 8;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[start..start + 8]);
        *part = u64::from_be_bytes(buf);
    }
    perm.decode(parts)
}

/// The six-permutation triplet index.
#[derive(Debug, Default)]
pub struct Hexastore {
    keys: BTreeSet<Vec<u8>>,
}

impl Hexastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert all six keys for the triplet.
    pub fn insert_triplet(&mut self, t: Triplet) {
        for perm in ALL_PERMS {
            self.keys.insert(encode(perm, &t));
        }
    }

    /// Remove all six keys. Returns true if the triplet was present.
    pub fn delete_triplet(&mut self, t: Triplet) -> bool {
        let mut removed = false;
        for perm in ALL_PERMS {
            removed |= self.keys.remove(&encode(perm, &t));
        }
        removed
    }

    /// Number of stored keys; six per live edge.
    pub fn key_count(&self) -> u64 {
        self.keys.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Scan triplets matching the pattern, in the lex order of the index
    /// selected for its bound components.
    pub fn scan(&self, pattern: TripletPattern) -> Vec<Triplet> {
        let (perm, prefix) = Self::select_index(pattern);
        self.prefix_scan(perm, &prefix)
            .filter(|t| {
                pattern.subject.map_or(true, |s| t.subject == s)
                    && pattern.rel_type.map_or(true, |p| t.rel_type == p)
                    && pattern.object.map_or(true, |o| t.object == o)
            })
            .collect()
    }

    /// Pick the permutation whose component order begins with the bound
    /// components, and build the scan prefix.
    fn select_index(pattern: TripletPattern) -> (Perm, Vec<u64>) {
        match (pattern.subject, pattern.rel_type, pattern.object) {
            (Some(s), Some(p), Some(o)) => (Perm::Sop, vec![s.0, o.0, p.0 as u64]),
            (Some(s), Some(p), None) => (Perm::Spo, vec![s.0, p.0 as u64]),
            (Some(s), None, Some(o)) => (Perm::Sop, vec![s.0, o.0]),
            (Some(s), None, None) => (Perm::Spo, vec![s.0]),
            (None, Some(p), Some(o)) => (Perm::Ops, vec![o.0, p.0 as u64]),
            (None, Some(p), None) => (Perm::Pso, vec![p.0 as u64]),
            (None, None, Some(o)) => (Perm::Ops, vec![o.0]),
            (None, None, None) => (Perm::Spo, Vec::new()),
        }
    }

    fn prefix_scan<'a>(
        &'a self,
        perm: Perm,
        prefix: &[u64],
    ) -> impl Iterator<Item = Triplet> + 'a {
        let mut lo = vec![perm as u8];
        for c in prefix {
            lo.extend_from_slice(&c.to_be_bytes());
        }
        let hi = upper_bound(&lo);
        self.keys
            .range((Bound::Included(lo), hi))
            .map(|k| decode(k))
    }
}

/// Exclusive upper bound of the byte-prefix range: the prefix with its
/// last byte incremented (carrying left on overflow).
fn upper_bound(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut hi = prefix.to_vec();
    while let Some(last) = hi.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Bound::Excluded(hi);
        }
        hi.pop();
    }
    Bound::Unbounded
}
