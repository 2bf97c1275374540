use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    BonusAward, BonusProgress, BonusRule, CompanyId, EarningsEvent, RuleId, ShiftSpan, WorkerId,
};
use super::progress::ProgressKey;

/// Storage abstraction for bonus rules so the service can be exercised in
/// isolation.
pub trait RuleRepository: Send + Sync {
    fn insert(&self, rule: BonusRule) -> Result<BonusRule, RuleStoreError>;
    fn update(&self, rule: BonusRule) -> Result<BonusRule, RuleStoreError>;
    fn fetch(&self, company_id: &CompanyId, id: &RuleId)
        -> Result<Option<BonusRule>, RuleStoreError>;
    fn list_active(&self, company_id: &CompanyId) -> Result<Vec<BonusRule>, RuleStoreError>;
}

/// Error enumeration for rule store failures.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("rule already exists")]
    Conflict,
    #[error("rule not found")]
    NotFound,
    #[error("rule store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to the earnings pipeline.
pub trait EarningsSource: Send + Sync {
    /// Earnings entries for one worker with `occurred_at` inside
    /// `[start, end)`, restricted to the named metric.
    fn earnings_in_window(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EarningsEvent>, EarningsError>;

    /// Workers with any recorded earnings inside `[start, end)`; drives
    /// worker discovery for batch runs.
    fn workers_with_earnings(
        &self,
        company_id: &CompanyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>, EarningsError>;
}

/// Error enumeration for earnings lookups.
#[derive(Debug, thiserror::Error)]
pub enum EarningsError {
    #[error("worker {0} not found")]
    WorkerNotFound(WorkerId),
    #[error("earnings source unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of a worker's recorded shift for a local calendar date.
pub trait ShiftDirectory: Send + Sync {
    fn shift_covering(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        date: NaiveDate,
    ) -> Result<Option<ShiftSpan>, ShiftLookupError>;
}

/// Error enumeration for shift lookups. Never fatal to an evaluation; the
/// window calculator falls back to the calendar day.
#[derive(Debug, thiserror::Error)]
pub enum ShiftLookupError {
    #[error("shift directory unavailable: {0}")]
    Unavailable(String),
}

/// Result of a monotonic progress upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressWrite {
    /// The row was created or moved forward.
    Applied,
    /// The stored row already carries equal or higher steps; nothing written.
    Superseded,
}

/// Award and progress storage. The one mutable surface the engine writes to.
///
/// `commit_award` is the pair-atomic write: the award and its progress update
/// land together or not at all, and the implementation must reject both a
/// second once-per-window award and any non-monotonic progress transition
/// with [`LedgerError::Conflict`] so concurrent runs serialize through the
/// storage layer instead of a process-wide lock.
pub trait AwardLedger: Send + Sync {
    fn progress(&self, key: &ProgressKey) -> Result<Option<BonusProgress>, LedgerError>;

    /// Monotonic upsert; see [`ProgressWrite`].
    fn record_progress(&self, row: BonusProgress) -> Result<ProgressWrite, LedgerError>;

    /// The award already issued for this (rule, worker, window), if any.
    fn award_in_window(&self, key: &ProgressKey) -> Result<Option<BonusAward>, LedgerError>;

    /// Atomically append `award` and apply `progress`.
    fn commit_award(
        &self,
        award: BonusAward,
        progress: BonusProgress,
    ) -> Result<BonusAward, LedgerError>;

    fn list_awards(
        &self,
        company_id: &CompanyId,
        filters: &AwardFilters,
        page: PageRequest,
    ) -> Result<AwardPage, LedgerError>;

    fn list_progress(
        &self,
        company_id: &CompanyId,
        filters: &ProgressFilters,
    ) -> Result<Vec<BonusProgress>, LedgerError>;
}

/// Error enumeration for ledger failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A conditional write lost: the window is already awarded or the stored
    /// progress moved past the expected state.
    #[error("conflicting ledger write")]
    Conflict,
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Filters for award listings; all optional and combined conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwardFilters {
    pub worker_id: Option<WorkerId>,
    pub rule_id: Option<RuleId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_amount_cents: Option<i64>,
    pub max_amount_cents: Option<i64>,
}

impl AwardFilters {
    pub fn matches(&self, award: &BonusAward) -> bool {
        if let Some(worker) = &self.worker_id {
            if &award.worker_id != worker {
                return false;
            }
        }
        if let Some(rule) = &self.rule_id {
            if &award.rule_id != rule {
                return false;
            }
        }
        if let Some(from) = self.from {
            if award.awarded_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if award.awarded_at >= to {
                return false;
            }
        }
        if let Some(min) = self.min_amount_cents {
            if award.bonus_amount_cents < min {
                return false;
            }
        }
        if let Some(max) = self.max_amount_cents {
            if award.bonus_amount_cents > max {
                return false;
            }
        }
        true
    }
}

/// Filters for progress listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressFilters {
    pub worker_id: Option<WorkerId>,
    pub rule_id: Option<RuleId>,
}

impl ProgressFilters {
    pub fn matches(&self, row: &BonusProgress) -> bool {
        if let Some(worker) = &self.worker_id {
            if &row.worker_id != worker {
                return false;
            }
        }
        if let Some(rule) = &self.rule_id {
            if &row.rule_id != rule {
                return false;
            }
        }
        true
    }
}

/// Pagination input for award listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> usize {
        let page = self.page.max(1);
        (page as usize - 1) * self.per_page as usize
    }
}

/// One page of awards plus the totals the reporting UI shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardPage {
    pub rows: Vec<BonusAward>,
    pub total_count: u64,
    pub total_amount_cents: i64,
}
