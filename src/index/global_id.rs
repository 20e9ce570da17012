//! `GlobalId`: a tagged, mesh-wide handle for nodes and elements.
//!
//! A distributed mesh addresses two disjoint id namespaces: node ids and
//! element ids. `GlobalId` folds both into a single `u64` by reserving the
//! high bit as the namespace tag, so the two namespaces never collide and a
//! single ordered map can index all locally stored rows.
//!
//! Encoding and decoding are pure inverses: `GlobalId::new(kind, raw)`
//! followed by `kind()`/`raw()` always returns the original pair. All node
//! ids sort before all element ids, which keeps the global→local map laid
//! out nodes-first, matching registration order.

use std::fmt;

/// Namespace tag carried by a [`GlobalId`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EntityKind {
    /// A mesh node (coordinate row).
    Node,
    /// A mesh element (connectivity row).
    Element,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Element => write!(f, "elem"),
        }
    }
}

const KIND_BIT: u64 = 1 << 63;

/// Tagged mesh-wide entity id.
///
/// # Memory layout
/// `repr(transparent)` over `u64`, so it crosses the wire and FFI boundaries
/// exactly like the raw integer it wraps.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct GlobalId(u64);

impl GlobalId {
    /// Tags `raw` with the given namespace.
    ///
    /// `raw` must be below 2^63; the high bit is reserved for the tag.
    #[inline]
    pub fn new(kind: EntityKind, raw: u64) -> Self {
        debug_assert!(raw & KIND_BIT == 0, "raw id must leave the tag bit clear");
        match kind {
            EntityKind::Node => GlobalId(raw),
            EntityKind::Element => GlobalId(raw | KIND_BIT),
        }
    }

    /// Tags a raw node id.
    #[inline]
    pub fn node(raw: u64) -> Self {
        Self::new(EntityKind::Node, raw)
    }

    /// Tags a raw element id.
    #[inline]
    pub fn element(raw: u64) -> Self {
        Self::new(EntityKind::Element, raw)
    }

    /// Reinterprets a tagged value received off the wire.
    #[inline]
    pub const fn from_tagged(tagged: u64) -> Self {
        GlobalId(tagged)
    }

    /// The namespace this id belongs to.
    #[inline]
    pub const fn kind(self) -> EntityKind {
        if self.0 & KIND_BIT == 0 {
            EntityKind::Node
        } else {
            EntityKind::Element
        }
    }

    /// The untagged id within its namespace.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0 & !KIND_BIT
    }

    /// The full tagged value as carried on the wire.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// True iff this id lives in the node namespace.
    #[inline]
    pub const fn is_node(self) -> bool {
        self.0 & KIND_BIT == 0
    }

    /// True iff this id lives in the element namespace.
    #[inline]
    pub const fn is_element(self) -> bool {
        self.0 & KIND_BIT != 0
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalId")
            .field(&self.kind())
            .field(&self.raw())
            .finish()
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.raw())
    }
}

#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for GlobalId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;

    fn equivalent_datatype() -> Self::Out {
        u64::equivalent_datatype()
    }
}

#[cfg(test)]
mod layout_tests {
    //! Compile-time assertion that `GlobalId` has the same size as `u64`.
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    assert_eq_size!(GlobalId, u64);
    assert_eq_align!(GlobalId, u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_and_untag_are_inverses() {
        for raw in [0u64, 1, 7, (1 << 62) + 5] {
            let n = GlobalId::node(raw);
            assert_eq!(n.kind(), EntityKind::Node);
            assert_eq!(n.raw(), raw);
            let e = GlobalId::element(raw);
            assert_eq!(e.kind(), EntityKind::Element);
            assert_eq!(e.raw(), raw);
        }
    }

    #[test]
    fn namespaces_never_collide() {
        assert_ne!(GlobalId::node(0), GlobalId::element(0));
        assert_ne!(GlobalId::node(42), GlobalId::element(42));
    }

    #[test]
    fn nodes_sort_before_elements() {
        assert!(GlobalId::node(u64::MAX >> 1) < GlobalId::element(0));
    }

    #[test]
    fn wire_roundtrip() {
        let e = GlobalId::element(99);
        assert_eq!(GlobalId::from_tagged(e.get()), e);
    }

    #[test]
    fn debug_and_display() {
        let n = GlobalId::node(7);
        assert_eq!(format!("{n}"), "node 7");
        let e = GlobalId::element(3);
        assert_eq!(format!("{e}"), "elem 3");
        assert_eq!(format!("{:?}", n), "GlobalId(Node, 7)");
    }
}
