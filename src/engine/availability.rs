use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Accumulate per-day consumption over `(range, quantity)` pairs, clamped to
/// the query window. Index i corresponds to `query.start + i`.
fn daily_totals(records: impl Iterator<Item = (DateRange, u32)>, query: &DateRange) -> Vec<u32> {
    let mut used = vec![0u32; query.nights() as usize];
    for (range, quantity) in records {
        let from = range.start.max(query.start);
        let to = range.end.min(query.end);
        for day in from..to {
            used[(day - query.start) as usize] += quantity;
        }
    }
    used
}

/// Per-day people usage for a campsite over a half-open day range. Only
/// counted (active-status) stays contribute. One output row per day;
/// `remaining = daily_capacity - used`.
pub fn campsite_usage(campsite: &CampsiteState, query: &DateRange) -> Vec<DayAvailability> {
    let used = daily_totals(
        campsite
            .overlapping(query)
            .filter(|s| s.counted)
            .map(|s| (s.range, s.people)),
        query,
    );
    used.into_iter()
        .enumerate()
        .map(|(i, used)| DayAvailability {
            day: query.start + i as Day,
            used,
            remaining: campsite.daily_capacity.saturating_sub(used),
        })
        .collect()
}

/// Per-day unit usage for an equipment item. Rental windows are anchored at
/// their booking's start day, so a window may cover only a prefix of the
/// booking's stay. `exclude` drops one booking's own rentals from the sum
/// (used when re-checking an equipment replacement on an active booking).
pub fn equipment_usage(
    equipment: &EquipmentState,
    query: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<DayAvailability> {
    let used = daily_totals(
        equipment
            .overlapping(query)
            .filter(|r| r.counted && Some(r.booking_id) != exclude)
            .map(|r| (r.window, r.quantity)),
        query,
    );
    used.into_iter()
        .enumerate()
        .map(|(i, used)| DayAvailability {
            day: query.start + i as Day,
            used,
            remaining: equipment.stock.saturating_sub(used),
        })
        .collect()
}
