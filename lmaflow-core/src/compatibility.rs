//! Rules for reporting several waste streams in one registry session.

use crate::model::WasteStream;

/// Whether two waste streams may be declared together in one session.
///
/// Streams are compatible when they share processor, consignor, and pickup
/// location. Route collections (no pickup location) only match each other.
#[must_use]
pub fn is_compatible(left: &WasteStream, right: &WasteStream) -> bool {
    left.processor_party == right.processor_party
        && left.consignor_party == right.consignor_party
        && left.pickup_location == right.pickup_location
}

/// Split items into batches of mutually compatible waste streams.
///
/// Input order is kept inside each batch; an item joins the first batch whose
/// leading stream it is compatible with.
pub fn partition_compatible<T, F>(items: Vec<T>, stream_of: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> &WasteStream,
{
    let mut batches: Vec<Vec<T>> = Vec::new();

    for item in items {
        let slot = batches.iter().position(|batch| {
            batch
                .first()
                .is_some_and(|lead| is_compatible(stream_of(lead), stream_of(&item)))
        });

        match slot.and_then(|index| batches.get_mut(index)) {
            Some(batch) => batch.push(item),
            None => batches.push(vec![item]),
        }
    }

    batches
}
