//! Bonus rule evaluation and award engine for chatter workforce payouts.
//!
//! Rules define tiered earnings thresholds over calendar (or shift) windows.
//! `preview` answers "what would this rule pay right now" without side
//! effects; `run` issues awards idempotently, at most once per window when a
//! rule says so, and records per-window progress so repeated evaluations only
//! pay for forward movement.

pub mod aggregate;
pub mod domain;
pub mod progress;
pub mod repository;
pub mod router;
pub mod service;
pub mod tiers;
pub mod window;

#[cfg(test)]
mod tests;

pub use domain::{
    AwardId, AwardSnapshot, BonusAward, BonusProgress, BonusRule, CompanyId, EarningsEvent,
    EarningsKind, RuleConfig, RuleDraft, RuleId, RuleValidationError, ShiftSpan, TierBand,
    WindowFallback, WindowKind, WindowSource, WindowSpan, WorkerId, EARNINGS_METRIC,
};
pub use progress::{advances as advances_progress, ProgressKey};
pub use repository::{
    AwardFilters, AwardLedger, AwardPage, EarningsError, EarningsSource, LedgerError, PageRequest,
    ProgressFilters, ProgressWrite, RuleRepository, RuleStoreError, ShiftDirectory,
    ShiftLookupError,
};
pub use router::bonus_router;
pub use service::{
    BonusAwardService, BonusServiceError, EngineConfig, EngineRunReport, EvaluationPreview,
    PairFailure, PairOutcome, PairStatus, RunRequest,
};
pub use tiers::{resolve_tier, ResolvedTier};
pub use window::{calendar_window, resolve_window};
