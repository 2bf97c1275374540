use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for the company (tenant) a request operates on.
///
/// Tenant scope is always an explicit field on requests and store calls; the
/// core never recovers it from a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanyId(pub String);

/// Identifier wrapper for bonus rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// Identifier wrapper for chatter employees.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

/// Identifier wrapper for issued awards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AwardId(pub String);

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AwardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The metric aggregated by the engine. Only chatter earnings are supported.
pub const EARNINGS_METRIC: &str = "earnings.amount_cents";

/// Evaluation window shape for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    CalendarDay,
    CalendarWeek,
    CalendarMonth,
}

impl WindowKind {
    pub const fn label(self) -> &'static str {
        match self {
            WindowKind::CalendarDay => "calendar_day",
            WindowKind::CalendarWeek => "calendar_week",
            WindowKind::CalendarMonth => "calendar_month",
        }
    }
}

/// One payout tier: workers whose window total reaches `min_amount_cents`
/// are entitled to `bonus_cents`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBand {
    pub min_amount_cents: i64,
    pub bonus_cents: i64,
}

/// Payout configuration carried by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub metric: String,
    /// Conceptually ascending by `min_amount_cents`; no duplicate minimums.
    pub tiers: Vec<TierBand>,
    /// When false, refund entries (negative amounts) are excluded outright.
    pub include_refunds: bool,
    /// Only meaningful for calendar-day rules: evaluate over the worker's
    /// actual shift span instead of midnight-to-midnight.
    pub shift_based: bool,
    /// At most one award per (rule, worker, window) when set.
    pub award_once_per_window: bool,
}

/// A tiered threshold-payout rule scoped to individual workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    pub window: WindowKind,
    /// Timezone the rule's windows are anchored in.
    pub timezone: Tz,
    /// Lower runs first when several rules apply to the same worker; ordering
    /// only, rules are independent.
    pub priority: i32,
    pub active: bool,
    pub config: RuleConfig,
}

/// Create/update payload for a rule, validated before it becomes a [`BonusRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub window: WindowKind,
    pub timezone: Tz,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    pub config: RuleConfig,
}

fn default_active() -> bool {
    true
}

impl RuleDraft {
    /// Check the data-model invariants that evaluation relies on.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.config.metric != EARNINGS_METRIC {
            return Err(RuleValidationError::UnsupportedMetric(
                self.config.metric.clone(),
            ));
        }
        if self.config.tiers.is_empty() {
            return Err(RuleValidationError::EmptyTiers);
        }

        let mut minimums = Vec::with_capacity(self.config.tiers.len());
        for tier in &self.config.tiers {
            if tier.min_amount_cents < 0 || tier.bonus_cents < 0 {
                return Err(RuleValidationError::NegativeTierAmount {
                    min_amount_cents: tier.min_amount_cents,
                    bonus_cents: tier.bonus_cents,
                });
            }
            if minimums.contains(&tier.min_amount_cents) {
                return Err(RuleValidationError::DuplicateTierMinimum(
                    tier.min_amount_cents,
                ));
            }
            minimums.push(tier.min_amount_cents);
        }

        Ok(())
    }

    pub fn into_rule(self, id: RuleId, company_id: CompanyId) -> BonusRule {
        BonusRule {
            id,
            company_id,
            name: self.name,
            window: self.window,
            timezone: self.timezone,
            priority: self.priority,
            active: self.active,
            config: self.config,
        }
    }
}

/// Rejection reasons for rule create/update payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleValidationError {
    #[error("a rule needs at least one tier")]
    EmptyTiers,
    #[error("two tiers share the minimum of {0} cents")]
    DuplicateTierMinimum(i64),
    #[error("tier amounts must be non-negative (min {min_amount_cents}, bonus {bonus_cents})")]
    NegativeTierAmount {
        min_amount_cents: i64,
        bonus_cents: i64,
    },
    #[error("unsupported metric '{0}'")]
    UnsupportedMetric(String),
}

/// Category of an earnings entry as recorded by the earnings pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsKind {
    Message,
    Unlock,
    Tip,
    Adjustment,
}

/// A single earnings entry for a worker. Immutable; the engine only reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub worker_id: WorkerId,
    /// Signed; negative entries are refunds.
    pub amount_cents: i64,
    pub occurred_at: DateTime<Utc>,
    pub kind: EarningsKind,
}

/// A worker's recorded shift span for one local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Why a shift-based window fell back to the calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFallback {
    NoShiftFound,
    ShiftLookupFailed,
}

impl WindowFallback {
    pub const fn label(self) -> &'static str {
        match self {
            WindowFallback::NoShiftFound => "no_shift_found",
            WindowFallback::ShiftLookupFailed => "shift_lookup_failed",
        }
    }
}

/// How a window's bounds were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WindowSource {
    Calendar,
    Shift,
    CalendarFallback { reason: WindowFallback },
}

/// A concrete half-open evaluation interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub source: WindowSource,
}

impl WindowSpan {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Last-observed award state for one (rule, worker, window) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusProgress {
    pub company_id: CompanyId,
    pub rule_id: RuleId,
    pub worker_id: WorkerId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Highest tier ordinal already awarded in this window. Monotonically
    /// non-decreasing for the lifetime of the window.
    pub last_observed_steps: u32,
    pub last_computed_at: DateTime<Utc>,
}

/// Snapshot of the tier and configuration in effect when an award was cut.
///
/// Awards must stay auditable even after the live rule is edited, so the
/// payout context is copied in rather than re-read later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardSnapshot {
    pub tier_steps: u32,
    pub tier: TierBand,
    pub window_total_cents: i64,
    pub config: RuleConfig,
}

/// An issued bonus. Append-only; never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusAward {
    pub id: AwardId,
    pub company_id: CompanyId,
    pub rule_id: RuleId,
    pub worker_id: WorkerId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub steps_awarded: u32,
    pub bonus_amount_cents: i64,
    pub currency: String,
    pub awarded_at: DateTime<Utc>,
    pub reason: String,
    pub payload: AwardSnapshot,
}
