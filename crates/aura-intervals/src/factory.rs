//! Endpoint Factory: turns `(position, side, origin)` requests into
//! correctly configured references, and assembles a complete [`Interval`]
//! from a pair of endpoint places.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::IntervalError;
use crate::interval::Interval;
use crate::properties::{strip_reserved, RESERVED_REFERENCE_RANGE_LABELS};
use crate::reference::{
    endpoint_pos_and_side, LookupContext, MergeTreeClient, Place, Position, RefOrigin,
    ReferenceType, SegmentPlace, Side, SlidingPreference,
};
use crate::IntervalType;

/// Turn a `(position, side, origin)` request into a correctly configured
/// reference.
///
/// # Errors
///
/// Returns [`IntervalError::Usage`] if `origin` is `Op` without
/// `SlideOnRemove`, if `origin` is `Local` with `SlideOnRemove` set, or if
/// no segment can be found for a request that requires one.
pub fn create_reference<C: MergeTreeClient>(
    client: &C,
    pos: Position,
    ref_type: ReferenceType,
    origin: RefOrigin,
    sliding_preference: SlidingPreference,
    can_slide_to_endpoint: bool,
    use_new_sliding_behavior: bool,
) -> Result<C::Ref, IntervalError> {
    if matches!(origin, RefOrigin::Op { .. }) && !ref_type.contains(ReferenceType::SLIDE_ON_REMOVE)
    {
        tracing::warn!(?origin, ?ref_type, "op-created reference missing SlideOnRemove");
        return Err(IntervalError::usage(
            "op-created references must carry SlideOnRemove",
        ));
    }
    if matches!(origin, RefOrigin::Local { .. })
        && ref_type.contains(ReferenceType::SLIDE_ON_REMOVE)
    {
        tracing::warn!(?origin, ?ref_type, "local reference unexpectedly carries SlideOnRemove");
        return Err(IntervalError::usage(
            "local references must not carry SlideOnRemove",
        ));
    }

    // Step 1: sentinels pass through unchanged, no segment lookup needed.
    if matches!(pos, Position::Start | Position::End) {
        let place = if pos == Position::Start {
            SegmentPlace::Start
        } else {
            SegmentPlace::End
        };
        return Ok(client.create_local_reference_position(
            place,
            0,
            ref_type,
            sliding_preference,
            can_slide_to_endpoint,
        ));
    }

    let index = pos
        .as_index()
        .expect("non-sentinel Position always carries an index");

    // Step 2: resolve (segment, offset) in the context the origin implies.
    let lookup = match &origin {
        RefOrigin::Op {
            reference_sequence_number,
            client_id,
        } => LookupContext::Op {
            reference_sequence_number: *reference_sequence_number,
            client_id: *client_id,
        },
        RefOrigin::Local { local_seq } => LookupContext::Local {
            local_seq: *local_seq,
        },
        RefOrigin::Snapshot | RefOrigin::Rollback | RefOrigin::Transient => {
            LookupContext::Local { local_seq: None }
        }
    };
    let mut segoff = client.get_containing_segment(index, lookup);

    // Step 3: op-created references are pre-slid to the position the
    // sender would have ended up at after any concurrent removes.
    if matches!(origin, RefOrigin::Op { .. }) && segoff.is_some() {
        segoff = client.slide_to_segoff(segoff, sliding_preference, use_new_sliding_behavior);
    }

    match segoff {
        Some((segment, offset)) => Ok(client.create_local_reference_position(
            SegmentPlace::Segment(segment),
            offset,
            ref_type,
            sliding_preference,
            can_slide_to_endpoint,
        )),
        None => {
            let detach_allowed = ref_type.contains(ReferenceType::TRANSIENT)
                || matches!(origin, RefOrigin::Op { .. })
                || matches!(origin, RefOrigin::Local { local_seq: Some(_) })
                || matches!(origin, RefOrigin::Snapshot)
                || matches!(origin, RefOrigin::Rollback);
            if detach_allowed {
                tracing::debug!(position = %pos, "no segment resolved; creating detached reference");
                Ok(client.create_detached_local_reference_position(sliding_preference, ref_type))
            } else {
                tracing::warn!(position = %pos, ?origin, "no segment resolved and detach not permitted");
                Err(IntervalError::usage("Non-transient references need segment"))
            }
        }
    }
}

/// Build a complete [`Interval`] from a pair of endpoint places.
///
/// `start_place`/`end_place` default to the sequence's start/end sentinels
/// when absent. `id` defaults to a fresh UUID v4 when absent or empty.
/// `rollback` forces `RefOrigin::Rollback` regardless of `origin`.
#[allow(clippy::too_many_arguments)]
pub fn create_interval<C: MergeTreeClient>(
    client: &C,
    label: impl Into<String>,
    id: Option<String>,
    start_place: Option<Place>,
    end_place: Option<Place>,
    interval_type: IntervalType,
    origin: Option<RefOrigin>,
    use_new_sliding_behavior: bool,
    props: Option<Map<String, Value>>,
    rollback: bool,
) -> Result<Interval<C>, IntervalError> {
    let label = label.into();
    let origin = if rollback {
        RefOrigin::Rollback
    } else {
        origin.unwrap_or(RefOrigin::Local { local_seq: None })
    };

    let (start_pos, start_side, end_pos, end_side) = endpoint_pos_and_side(start_place, end_place);
    let stickiness =
        client.compute_stickiness_from_side(start_pos.into(), start_side, end_pos.into(), end_side);

    let (begin_ref_type, end_ref_type) = if interval_type == IntervalType::Transient {
        (
            ReferenceType::RANGE_BEGIN | ReferenceType::TRANSIENT,
            ReferenceType::RANGE_END | ReferenceType::TRANSIENT,
        )
    } else if matches!(origin, RefOrigin::Op { .. } | RefOrigin::Snapshot) {
        (
            ReferenceType::RANGE_BEGIN | ReferenceType::SLIDE_ON_REMOVE,
            ReferenceType::RANGE_END | ReferenceType::SLIDE_ON_REMOVE,
        )
    } else {
        (
            ReferenceType::RANGE_BEGIN | ReferenceType::STAY_ON_REMOVE,
            ReferenceType::RANGE_END | ReferenceType::STAY_ON_REMOVE,
        )
    };

    let start_sliding_preference = client.start_reference_sliding_preference(stickiness);
    let end_sliding_preference = client.end_reference_sliding_preference(stickiness);
    let start_can_slide_to_endpoint = start_sliding_preference == SlidingPreference::Backward;
    let end_can_slide_to_endpoint = end_sliding_preference == SlidingPreference::Forward;

    let start_ref = create_reference(
        client,
        start_pos,
        begin_ref_type,
        origin.clone(),
        start_sliding_preference,
        start_can_slide_to_endpoint,
        use_new_sliding_behavior,
    )?;
    let end_ref = create_reference(
        client,
        end_pos,
        end_ref_type,
        origin,
        end_sliding_preference,
        end_can_slide_to_endpoint,
        use_new_sliding_behavior,
    )?;

    let mut labels_prop = Map::new();
    labels_prop.insert(
        RESERVED_REFERENCE_RANGE_LABELS.to_string(),
        Value::Array(vec![Value::String(label.clone())]),
    );
    client.attach_ref_properties(&start_ref, labels_prop.clone());
    client.attach_ref_properties(&end_ref, labels_prop);

    let id = match id {
        Some(id) if !id.is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };

    let clean_props = props.map(strip_reserved).unwrap_or_default();

    Ok(Interval::new(
        id,
        label,
        start_ref,
        end_ref,
        interval_type,
        clean_props,
        start_side,
        end_side,
    ))
}

/// Build a transient (query-only, never acked) interval directly from
/// numeric bounds, skipping the usual local/op origin machinery.
pub fn create_transient_interval<C: MergeTreeClient>(
    start: Position,
    end: Position,
    client: &C,
) -> Result<Interval<C>, IntervalError> {
    create_interval(
        client,
        String::new(),
        None,
        Some(Place {
            pos: start,
            side: Side::Before,
        }),
        Some(Place {
            pos: end,
            side: Side::Before,
        }),
        IntervalType::Transient,
        Some(RefOrigin::Transient),
        false,
        None,
        false,
    )
}
