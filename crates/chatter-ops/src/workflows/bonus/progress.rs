use chrono::{DateTime, Utc};

use super::domain::{BonusProgress, CompanyId, RuleId, WindowSpan, WorkerId};

/// Logical identity of a progress row. The window bounds are part of the key:
/// a window rollover starts a fresh row and earlier rows stay behind as
/// history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    pub company_id: CompanyId,
    pub rule_id: RuleId,
    pub worker_id: WorkerId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl ProgressKey {
    pub fn new(
        company_id: CompanyId,
        rule_id: RuleId,
        worker_id: WorkerId,
        window: &WindowSpan,
    ) -> Self {
        Self {
            company_id,
            rule_id,
            worker_id,
            window_start: window.start,
            window_end: window.end,
        }
    }

    pub fn row(&self, steps: u32, computed_at: DateTime<Utc>) -> BonusProgress {
        BonusProgress {
            company_id: self.company_id.clone(),
            rule_id: self.rule_id.clone(),
            worker_id: self.worker_id.clone(),
            window_start: self.window_start,
            window_end: self.window_end,
            last_observed_steps: steps,
            last_computed_at: computed_at,
        }
    }
}

/// Whether writing `steps` over the stored row would move progress forward.
///
/// A missing row always accepts the write (this is how a window's row gets
/// created, including at zero steps). Stored steps never decrease within a
/// window; stale or out-of-order writes must be ignored by every ledger
/// implementation.
pub fn advances(existing: Option<&BonusProgress>, steps: u32) -> bool {
    match existing {
        Some(row) => steps > row.last_observed_steps,
        None => true,
    }
}
