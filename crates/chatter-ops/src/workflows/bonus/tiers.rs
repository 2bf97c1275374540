use super::domain::TierBand;

/// The tier a window total resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTier {
    /// Number of positive-minimum tiers the total has crossed. A zero-minimum
    /// floor tier resolves at step 0, so it never triggers an award on its
    /// own; stored progress only ever pays for upward movement past real
    /// thresholds.
    pub steps: u32,
    pub band: TierBand,
}

/// Resolve the highest tier whose minimum the total reaches.
///
/// Returns `None` when the total sits below every minimum. The tier list is
/// sorted here rather than trusted: validation keeps minimums unique, but
/// equal minimums are still resolved deterministically to the larger bonus
/// so a malformed rule cannot make payouts order-dependent.
pub fn resolve_tier(total_cents: i64, tiers: &[TierBand]) -> Option<ResolvedTier> {
    let mut sorted: Vec<TierBand> = tiers.to_vec();
    sorted.sort_by(|a, b| {
        a.min_amount_cents
            .cmp(&b.min_amount_cents)
            .then(b.bonus_cents.cmp(&a.bonus_cents))
    });
    sorted.dedup_by_key(|band| band.min_amount_cents);

    let satisfied: Vec<&TierBand> = sorted
        .iter()
        .take_while(|band| band.min_amount_cents <= total_cents)
        .collect();

    let steps = satisfied
        .iter()
        .filter(|band| band.min_amount_cents > 0)
        .count() as u32;

    satisfied.last().map(|band| ResolvedTier {
        steps,
        band: **band,
    })
}
