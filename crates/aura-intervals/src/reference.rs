//! The data model and the merge-tree collaborator trait.
//!
//! `aura-intervals` never implements a merge tree. Everything in this
//! module that needs to resolve a position, compare two references, or
//! slide a reference past a removed segment is expressed as a method on
//! [`MergeTreeClient`] — a trait the host application implements once over
//! its real segment storage. The fake client under `#[cfg(test)]` in
//! `interval.rs` is the only implementation this crate ships.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Which side of a character position an endpoint logically sits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The endpoint sits immediately before the position.
    Before,
    /// The endpoint sits immediately after the position.
    After,
}

/// Direction a reference slides when its anchoring segment is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlidingPreference {
    /// Slide toward later content.
    Forward,
    /// Slide toward earlier content.
    Backward,
}

/// Whether (and how) an interval's start/end stick to content inserted
/// exactly at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stickiness {
    /// Neither endpoint sticks.
    None,
    /// Only the start sticks.
    Start,
    /// Only the end sticks.
    End,
    /// Both endpoints stick.
    Full,
}

impl Stickiness {
    /// True if this stickiness has the start bit set (`Start` or `Full`).
    pub fn sticks_start(self) -> bool {
        matches!(self, Stickiness::Start | Stickiness::Full)
    }

    /// True if this stickiness has the end bit set (`End` or `Full`).
    pub fn sticks_end(self) -> bool {
        matches!(self, Stickiness::End | Stickiness::Full)
    }
}

/// Legacy interval-behavior tag. All non-transient intervals in this core
/// behave as `SlideOnRemove` once acked regardless of which of these two
/// legacy values they carry; only `Transient` changes behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalType {
    /// Ephemeral, used only to query overlap at a moment; never acked.
    Transient,
    /// Slides its endpoints when their anchoring segment is removed.
    SlideOnRemove,
    /// Legacy nesting behavior; treated as `SlideOnRemove` once acked.
    Nest,
    /// Legacy simple behavior; treated as `SlideOnRemove` once acked.
    Simple,
}

/// A position in the sequence: a numeric segment-relative index, or one of
/// the two sentinel endpoints of the whole sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    /// A numeric index into the sequence.
    Index(u32),
    /// The sentinel immediately before the entire sequence.
    Start,
    /// The sentinel immediately after the entire sequence.
    End,
}

impl Position {
    /// The numeric index, if this is not a sentinel.
    pub fn as_index(self) -> Option<u32> {
        match self {
            Position::Index(n) => Some(n),
            Position::Start | Position::End => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Index(n) => write!(f, "{n}"),
            Position::Start => write!(f, "start"),
            Position::End => write!(f, "end"),
        }
    }
}

impl Serialize for Position {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Position::Index(n) => serializer.serialize_u32(*n),
            Position::Start => serializer.serialize_str("start"),
            Position::End => serializer.serialize_str("end"),
        }
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PositionVisitor;

        impl serde::de::Visitor<'_> for PositionVisitor {
            type Value = Position;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer, \"start\", or \"end\"")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Position, E>
            where
                E: serde::de::Error,
            {
                Ok(Position::Index(v as u32))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Position, E>
            where
                E: serde::de::Error,
            {
                Ok(Position::Index(v as u32))
            }

            fn visit_str<E>(self, v: &str) -> Result<Position, E>
            where
                E: serde::de::Error,
            {
                match v {
                    "start" => Ok(Position::Start),
                    "end" => Ok(Position::End),
                    other => Err(E::custom(format!("unknown position sentinel: {other}"))),
                }
            }
        }

        deserializer.deserialize_any(PositionVisitor)
    }
}

/// A `(position, side)` pair, as accepted by `create_interval`/`modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Place {
    /// The position component.
    pub pos: Position,
    /// The side component.
    pub side: Side,
}

/// Which kind of place an endpoint resolves to, for stickiness purposes.
/// Distinct from [`SegmentPlace`]: this only distinguishes sentinel vs.
/// ordinary segment, without carrying a concrete segment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Anchored at the sequence's start sentinel.
    Start,
    /// Anchored at the sequence's end sentinel.
    End,
    /// Anchored at an ordinary segment.
    Normal,
}

impl From<Position> for EndpointKind {
    fn from(pos: Position) -> Self {
        match pos {
            Position::Start => EndpointKind::Start,
            Position::End => EndpointKind::End,
            Position::Index(_) => EndpointKind::Normal,
        }
    }
}

/// A bitset over reference-type flags. Modeled as a plain unsigned
/// bitfield with named constants: the mutual exclusion of
/// `SlideOnRemove`/`StayOnRemove` is enforced by the construction-site
/// code paths in `factory.rs`, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ReferenceType(u8);

impl ReferenceType {
    /// Marks the start endpoint of a range.
    pub const RANGE_BEGIN: ReferenceType = ReferenceType(1 << 0);
    /// Marks the end endpoint of a range.
    pub const RANGE_END: ReferenceType = ReferenceType(1 << 1);
    /// The reference slides to a neighboring segment when its anchor is removed.
    pub const SLIDE_ON_REMOVE: ReferenceType = ReferenceType(1 << 2);
    /// The reference stays put (pending ack) when its anchor is removed.
    pub const STAY_ON_REMOVE: ReferenceType = ReferenceType(1 << 3);
    /// The reference is ephemeral and never slides or acks.
    pub const TRANSIENT: ReferenceType = ReferenceType(1 << 4);

    /// The empty bitset.
    pub const NONE: ReferenceType = ReferenceType(0);

    /// Union of two bitsets.
    pub fn union(self, other: ReferenceType) -> ReferenceType {
        ReferenceType(self.0 | other.0)
    }

    /// Bitset minus the given flags.
    pub fn without(self, other: ReferenceType) -> ReferenceType {
        ReferenceType(self.0 & !other.0)
    }

    /// True if `self` has every bit set in `other`.
    pub fn contains(self, other: ReferenceType) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ReferenceType {
    type Output = ReferenceType;
    fn bitor(self, rhs: ReferenceType) -> ReferenceType {
        self.union(rhs)
    }
}

/// Origin context for a reference-creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefOrigin {
    /// Created by local user action; not yet an op.
    Local {
        /// The local sequence number at creation time, if any. `None` for
        /// an immediate-local reference with no local seq assigned yet.
        local_seq: Option<u64>,
    },
    /// Created while applying an inbound remote op.
    Op {
        /// The op's reference sequence number.
        reference_sequence_number: i64,
        /// The id of the client that authored the op.
        client_id: u64,
    },
    /// Created while loading a snapshot.
    Snapshot,
    /// Created while rolling back a speculative local op.
    Rollback,
    /// Created for a transient (query-only) interval.
    Transient,
}

/// An operation's sequence metadata, as needed both for property-change
/// reconciliation (`sequence_number`) and for sourcing a `modify` call's
/// replacement references with `RefOrigin::Op` (`reference_sequence_number`,
/// `client_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// The sequence number this op was assigned once acked.
    pub sequence_number: i64,
    /// The reference sequence number the op's author had observed.
    pub reference_sequence_number: i64,
    /// The id of the client that authored the op.
    pub client_id: u64,
}

/// Sentinel used for pending local property changes that have not yet been
/// sequenced.
pub const UNASSIGNED_SEQUENCE_NUMBER: i64 = -1;

/// Sentinel used for property changes applied while not collaborating.
pub const UNIVERSAL_SEQUENCE_NUMBER: i64 = 0;

/// Where a reference is anchored: a sentinel endpoint, or an ordinary
/// segment handle owned by the merge tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPlace<S> {
    /// Anchored at the sequence's start sentinel.
    Start,
    /// Anchored at the sequence's end sentinel.
    End,
    /// Anchored at an ordinary segment, at the given offset within it.
    Segment(S),
}

impl<S> SegmentPlace<S> {
    /// The [`EndpointKind`] this place corresponds to.
    pub fn kind(&self) -> EndpointKind {
        match self {
            SegmentPlace::Start => EndpointKind::Start,
            SegmentPlace::End => EndpointKind::End,
            SegmentPlace::Segment(_) => EndpointKind::Normal,
        }
    }
}

/// Where to resolve a numeric position from: the op that created the
/// reference, or the creator's local sequence view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupContext {
    /// Resolve as the sender of an op would have, at the op's reference
    /// sequence number and client id.
    Op {
        /// Reference sequence number of the op.
        reference_sequence_number: i64,
        /// Id of the client that authored the op.
        client_id: u64,
    },
    /// Resolve against the creator's local, possibly-unacked, view.
    Local {
        /// The local sequence number to resolve against, if any.
        local_seq: Option<u64>,
    },
}

/// Which endpoint of an interval a slide callback fired for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The interval's start endpoint.
    Start,
    /// The interval's end endpoint.
    End,
}

/// A slide-notification callback. Plain `Rc` closures are sufficient: the
/// subsystem is single-threaded and cooperative.
pub type SlideListener = Rc<dyn Fn(Endpoint)>;

/// The merge-tree collaborator surface this crate consumes.
///
/// Implementations own segment storage, position↔segment mapping, and the
/// local-reference sliding mechanics; this crate only calls into them.
/// `compute_stickiness_from_side`, `start_reference_sliding_preference`,
/// and `end_reference_sliding_preference` have default implementations
/// (a reasonable fixed table) but are conceptually supplied by the merge
/// tree and may be overridden by a real implementation with its own table.
pub trait MergeTreeClient {
    /// Opaque handle to a created position reference. `PartialEq` is
    /// reference-identity equality (the same underlying PR), not mere
    /// positional equality — `union`'s "identical PR" tie-break relies on
    /// this distinction.
    type Ref: Clone + PartialEq;
    /// Opaque handle to a segment.
    type Segment: Clone + PartialEq;

    /// Create an attached reference at the given place.
    fn create_local_reference_position(
        &self,
        place: SegmentPlace<Self::Segment>,
        offset: u32,
        ref_type: ReferenceType,
        sliding_preference: SlidingPreference,
        can_slide_to_endpoint: bool,
    ) -> Self::Ref;

    /// Create a reference with no segment yet; it attaches when one
    /// materializes (e.g. during rebase).
    fn create_detached_local_reference_position(
        &self,
        sliding_preference: SlidingPreference,
        ref_type: ReferenceType,
    ) -> Self::Ref;

    /// Attach (or merge in) properties on an already-created reference.
    fn attach_ref_properties(
        &self,
        r: &Self::Ref,
        props: serde_json::Map<String, serde_json::Value>,
    );

    /// Read back the properties currently attached to a reference. Used by
    /// `modify` to carry forward a replaced endpoint's properties onto its
    /// successor.
    fn ref_properties(&self, r: &Self::Ref) -> serde_json::Map<String, serde_json::Value>;

    /// Resolve a numeric position to `(segment, offset)` in the given
    /// lookup context, or `None` if no segment currently covers it.
    fn get_containing_segment(
        &self,
        pos: u32,
        lookup: LookupContext,
    ) -> Option<(Self::Segment, u32)>;

    /// Translate an attached reference back to its current numeric
    /// position.
    fn local_reference_position_to_position(&self, r: &Self::Ref) -> u32;

    /// The current (local) sequence number.
    fn current_seq(&self) -> i64;

    /// Whether this client is part of an active collaboration session.
    fn is_collaborating(&self) -> bool;

    /// Re-target a resolved `(segment, offset)` to where it would land
    /// after pending removes, per the given sliding preference.
    fn slide_to_segoff(
        &self,
        segoff: Option<(Self::Segment, u32)>,
        preference: SlidingPreference,
        use_new_sliding_behavior: bool,
    ) -> Option<(Self::Segment, u32)>;

    /// Total order comparator over two references' current positions.
    fn compare_references(&self, a: &Self::Ref, b: &Self::Ref) -> Ordering;

    /// Where a reference is currently anchored, or `None` if detached.
    fn ref_place(&self, r: &Self::Ref) -> Option<SegmentPlace<Self::Segment>>;

    /// Wire a reference's slide callbacks. `None` clears a slot.
    fn set_slide_listeners(
        &self,
        r: &Self::Ref,
        before: Option<SlideListener>,
        after: Option<SlideListener>,
    );

    /// Whichever of `a`/`b` compares no later than the other.
    fn min_reference_position(&self, a: &Self::Ref, b: &Self::Ref) -> Self::Ref {
        match self.compare_references(a, b) {
            Ordering::Greater => b.clone(),
            _ => a.clone(),
        }
    }

    /// Whichever of `a`/`b` compares no earlier than the other.
    fn max_reference_position(&self, a: &Self::Ref, b: &Self::Ref) -> Self::Ref {
        match self.compare_references(a, b) {
            Ordering::Less => b.clone(),
            _ => a.clone(),
        }
    }

    /// The fixed table deriving stickiness from the four endpoint inputs.
    /// Default: an endpoint sticks when inserts exactly at its boundary
    /// should be considered inside the interval — the start sticks when
    /// it is a `Before`-side anchor or the start sentinel, the end sticks
    /// when it is an `After`-side anchor or the end sentinel.
    fn compute_stickiness_from_side(
        &self,
        start_kind: EndpointKind,
        start_side: Side,
        end_kind: EndpointKind,
        end_side: Side,
    ) -> Stickiness {
        let start_sticks = start_kind == EndpointKind::Start || start_side == Side::Before;
        let end_sticks = end_kind == EndpointKind::End || end_side == Side::After;
        match (start_sticks, end_sticks) {
            (true, true) => Stickiness::Full,
            (true, false) => Stickiness::Start,
            (false, true) => Stickiness::End,
            (false, false) => Stickiness::None,
        }
    }

    /// The fixed table deriving the start endpoint's sliding preference
    /// from stickiness. Default: slide backward (toward earlier
    /// content) when the start sticks, else forward.
    fn start_reference_sliding_preference(&self, stickiness: Stickiness) -> SlidingPreference {
        if stickiness.sticks_start() {
            SlidingPreference::Backward
        } else {
            SlidingPreference::Forward
        }
    }

    /// The fixed table deriving the end endpoint's sliding preference from
    /// stickiness. Default: slide forward (toward later content,
    /// away from the boundary) unless the end sticks, in which case it
    /// slides backward to keep hugging the boundary it's sticky to.
    fn end_reference_sliding_preference(&self, stickiness: Stickiness) -> SlidingPreference {
        if stickiness.sticks_end() {
            SlidingPreference::Backward
        } else {
            SlidingPreference::Forward
        }
    }
}

/// Normalize optional `(place)` inputs into the 4-tuple `create_interval`
/// needs, defaulting a missing start to the sequence start (inclusive) and
/// a missing end to the sequence end.
pub fn endpoint_pos_and_side(
    start_place: Option<Place>,
    end_place: Option<Place>,
) -> (Position, Side, Position, Side) {
    let start = start_place.unwrap_or(Place {
        pos: Position::Start,
        side: Side::Before,
    });
    let end = end_place.unwrap_or(Place {
        pos: Position::End,
        side: Side::Before,
    });
    (start.pos, start.side, end.pos, end.side)
}
