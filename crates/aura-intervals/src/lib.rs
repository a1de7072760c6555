//! # Aura Intervals
//!
//! **Purpose**: Endpoint-reference and interval model for a single
//! collaboratively edited character sequence.
//!
//! This crate defines the position-reference lifecycle, stickiness
//! derivation, interval comparison/overlap/union/modify, and the wire
//! format a sequence of intervals is persisted and exchanged as. It holds
//! no merge-tree storage of its own: the host application's segment
//! storage and sliding mechanics are consumed through the
//! [`MergeTreeClient`] trait boundary in [`reference`].
//!
//! # Modules
//!
//! - `reference`: the data model (sides, stickiness, reference types) and
//!   the [`MergeTreeClient`] collaborator trait
//! - `factory`: turns `(position, side, origin)` requests into correctly
//!   configured references and assembles complete intervals
//! - `interval`: the [`Interval`] value type — comparison, overlap, union,
//!   modify, (de)serialization
//! - `properties`: last-writer-wins property reconciliation
//! - `wire`: the serialized interval delta format and legacy id synthesis
//! - `error`: [`IntervalError`]

#![forbid(unsafe_code)]

/// Unified error type for this crate.
pub mod error;
/// Endpoint factory and interval construction.
pub mod factory;
/// The interval value type.
pub mod interval;
/// Last-writer-wins property reconciliation.
pub mod properties;
/// The data model and merge-tree collaborator trait.
pub mod reference;
/// The wire format and legacy id synthesis.
pub mod wire;

pub use error::IntervalError;
pub use factory::{create_interval, create_reference, create_transient_interval};
pub use interval::{deserialize_interval, Interval};
pub use properties::PropertyManager;
pub use reference::{
    Endpoint, EndpointKind, IntervalType, LookupContext, MergeTreeClient, OpInfo, Place, Position,
    RefOrigin, ReferenceType, SegmentPlace, Side, SlideListener, SlidingPreference, Stickiness,
    UNASSIGNED_SEQUENCE_NUMBER, UNIVERSAL_SEQUENCE_NUMBER,
};
pub use wire::{get_serialized_properties, SerializedInterval, SerializedIntervalDelta, SerializedProperties};
