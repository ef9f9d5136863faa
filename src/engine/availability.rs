use crate::model::*;

// ── Availability ──────────────────────────────────────────────────

/// Rooms free for the whole of `stay`, ordered by room number then id.
///
/// A room drops out as soon as any stay of any of its reservations overlaps
/// the request. Nothing is mutated; calling twice on the same snapshot gives
/// the same rooms in the same order.
pub fn available_rooms<'a>(rooms: &'a [Room], stay: &Stay) -> Vec<&'a Room> {
    let mut free: Vec<&Room> = rooms.iter().filter(|room| room.is_free(stay)).collect();
    sort_by_number(&mut free);
    free
}

/// Numeric room order. The id tiebreak keeps duplicated numbers stable.
pub(crate) fn sort_by_number(rooms: &mut [&Room]) {
    rooms.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
}
