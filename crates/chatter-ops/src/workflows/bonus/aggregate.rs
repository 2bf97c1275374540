use super::domain::{EarningsEvent, WindowSpan};

/// Sum the earnings that qualify for tier comparison inside `window`.
///
/// Entries are counted when `occurred_at` falls in the half-open
/// `[start, end)` interval; an entry exactly at `end` belongs to the next
/// window. With `include_refunds = false`, refund entries (negative amounts)
/// are excluded outright rather than floored per entry. The resulting total
/// is floored at zero: a rule never owes negative bonus.
pub fn qualifying_total(
    events: &[EarningsEvent],
    window: &WindowSpan,
    include_refunds: bool,
) -> i64 {
    let total: i64 = events
        .iter()
        .filter(|event| window.contains(event.occurred_at))
        .filter(|event| include_refunds || event.amount_cents >= 0)
        .map(|event| event.amount_cents)
        .sum();

    total.max(0)
}
