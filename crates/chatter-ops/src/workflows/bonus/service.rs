use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::aggregate::qualifying_total;
use super::domain::{
    AwardId, AwardSnapshot, BonusAward, BonusProgress, BonusRule, CompanyId, RuleDraft, RuleId,
    RuleValidationError, WindowSource, WindowSpan, WorkerId,
};
use super::progress::ProgressKey;
use super::repository::{
    AwardFilters, AwardLedger, AwardPage, EarningsError, EarningsSource, LedgerError, PageRequest,
    ProgressFilters, RuleRepository, RuleStoreError, ShiftDirectory,
};
use super::tiers::{resolve_tier, ResolvedTier};
use super::window::{calendar_window, resolve_window};

/// Tunables for the award engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency code stamped on every award.
    pub currency: String,
    /// Extra attempts after a conflicting ledger write before the pair is
    /// reported as failed.
    pub conflict_retry_limit: u32,
    /// Base backoff between conflict retries; grows linearly per attempt.
    pub conflict_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            conflict_retry_limit: 3,
            conflict_backoff: Duration::from_millis(5),
        }
    }
}

static RULE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static AWARD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_rule_id() -> RuleId {
    let id = RULE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RuleId(format!("rule-{id:06}"))
}

fn next_award_id() -> AwardId {
    let id = AWARD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AwardId(format!("award-{id:06}"))
}

/// Service composing rule storage, the earnings feed, the shift directory,
/// and the award ledger into the preview/run engine plus rule administration.
pub struct BonusAwardService<R, E, S, L> {
    rules: Arc<R>,
    earnings: Arc<E>,
    shifts: Arc<S>,
    ledger: Arc<L>,
    engine: EngineConfig,
}

/// Error raised by the bonus service.
#[derive(Debug, thiserror::Error)]
pub enum BonusServiceError {
    #[error("bonus rule {0} not found")]
    RuleNotFound(RuleId),
    #[error(transparent)]
    InvalidRule(#[from] RuleValidationError),
    #[error(transparent)]
    Rules(#[from] RuleStoreError),
    #[error(transparent)]
    Earnings(#[from] EarningsError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Read-only evaluation of one rule × worker × instant. Every intermediate
/// value is surfaced so the admin panel can show its work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationPreview {
    pub rule_id: RuleId,
    pub worker_id: WorkerId,
    pub rule_active: bool,
    pub window: WindowSpan,
    pub total_cents: i64,
    pub entitled_steps: u32,
    pub entitled_bonus_cents: i64,
    pub last_observed_steps: u32,
    pub delta_steps: i64,
    pub expected_award_cents: i64,
    pub reason: String,
}

/// Scope of a side-effecting engine run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Restrict to one rule; otherwise every active rule runs.
    pub rule_id: Option<RuleId>,
    /// Restrict to one worker; otherwise workers are discovered from
    /// earnings activity inside each rule's window.
    pub worker_id: Option<WorkerId>,
    /// Evaluation instant; defaults to now.
    pub as_of: Option<DateTime<Utc>>,
}

/// Disposition of one evaluated (rule, worker) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Awarded,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub rule_id: RuleId,
    pub worker_id: WorkerId,
    pub status: PairStatus,
    pub awarded_cents: i64,
    pub steps_awarded: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFailure {
    pub rule_id: RuleId,
    pub worker_id: Option<WorkerId>,
    pub error: String,
}

/// Batch result of a run: the summary counters plus per-pair detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRunReport {
    pub as_of: DateTime<Utc>,
    pub rules_evaluated: u32,
    pub pairs_evaluated: u32,
    pub awards_created: u32,
    pub total_awarded_cents: i64,
    pub outcomes: Vec<PairOutcome>,
    pub failures: Vec<PairFailure>,
}

/// Everything `preview` and `run` share for one pair at one instant.
struct Assessment {
    window: WindowSpan,
    total_cents: i64,
    entitled: Option<ResolvedTier>,
    last_observed_steps: u32,
    has_progress_row: bool,
    delta_steps: i64,
    window_awarded: bool,
    expected_award_cents: i64,
}

impl Assessment {
    fn entitled_steps(&self) -> u32 {
        self.entitled.map(|tier| tier.steps).unwrap_or(0)
    }

    fn entitled_bonus_cents(&self) -> i64 {
        self.entitled.map(|tier| tier.band.bonus_cents).unwrap_or(0)
    }
}

impl<R, E, S, L> BonusAwardService<R, E, S, L>
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    pub fn new(
        rules: Arc<R>,
        earnings: Arc<E>,
        shifts: Arc<S>,
        ledger: Arc<L>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            rules,
            earnings,
            shifts,
            ledger,
            engine,
        }
    }

    /// Create a rule after checking the tier invariants.
    pub fn create_rule(
        &self,
        company_id: &CompanyId,
        draft: RuleDraft,
    ) -> Result<BonusRule, BonusServiceError> {
        draft.validate()?;
        let rule = draft.into_rule(next_rule_id(), company_id.clone());
        Ok(self.rules.insert(rule)?)
    }

    /// Replace a rule's definition. Past awards are unaffected; they carry
    /// their own config snapshot.
    pub fn update_rule(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
        draft: RuleDraft,
    ) -> Result<BonusRule, BonusServiceError> {
        draft.validate()?;
        self.require_rule(company_id, rule_id)?;
        let rule = draft.into_rule(rule_id.clone(), company_id.clone());
        Ok(self.rules.update(rule)?)
    }

    pub fn set_rule_active(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
        active: bool,
    ) -> Result<BonusRule, BonusServiceError> {
        let mut rule = self.require_rule(company_id, rule_id)?;
        rule.active = active;
        Ok(self.rules.update(rule)?)
    }

    /// Copy an existing rule under a fresh id. Clones start inactive so a
    /// manager can adjust tiers before switching them on.
    pub fn clone_rule(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
        name: Option<String>,
    ) -> Result<BonusRule, BonusServiceError> {
        let source = self.require_rule(company_id, rule_id)?;
        let mut clone = source;
        clone.id = next_rule_id();
        clone.name = name.unwrap_or_else(|| format!("{} (copy)", clone.name));
        clone.active = false;
        Ok(self.rules.insert(clone)?)
    }

    /// Evaluate one rule × worker without touching the ledger. Inactive
    /// rules are previewable; the result flags `rule_active` instead of
    /// refusing.
    pub fn preview(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
        worker_id: &WorkerId,
        as_of: DateTime<Utc>,
    ) -> Result<EvaluationPreview, BonusServiceError> {
        let rule = self.require_rule(company_id, rule_id)?;
        let assessment = self.assess(&rule, company_id, worker_id, as_of)?;
        let reason = describe_assessment(&rule, &assessment);

        Ok(EvaluationPreview {
            rule_id: rule.id,
            worker_id: worker_id.clone(),
            rule_active: rule.active,
            window: assessment.window,
            total_cents: assessment.total_cents,
            entitled_steps: assessment.entitled_steps(),
            entitled_bonus_cents: assessment.entitled_bonus_cents(),
            last_observed_steps: assessment.last_observed_steps,
            delta_steps: assessment.delta_steps,
            expected_award_cents: assessment.expected_award_cents,
            reason,
        })
    }

    /// Side-effecting batch evaluation. Each pair commits independently; a
    /// failing pair is reported and never aborts the rest of the batch.
    pub fn run(
        &self,
        company_id: &CompanyId,
        request: RunRequest,
    ) -> Result<EngineRunReport, BonusServiceError> {
        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let rules = self.rules_for_run(company_id, request.rule_id.as_ref())?;

        let mut report = EngineRunReport {
            as_of,
            rules_evaluated: 0,
            pairs_evaluated: 0,
            awards_created: 0,
            total_awarded_cents: 0,
            outcomes: Vec::new(),
            failures: Vec::new(),
        };

        for rule in rules {
            report.rules_evaluated += 1;

            let workers = match &request.worker_id {
                Some(worker) => vec![worker.clone()],
                None => {
                    // Discovery always uses the calendar window; a shift span
                    // only narrows aggregation once the worker is known.
                    let window = calendar_window(rule.window, as_of, rule.timezone);
                    match self
                        .earnings
                        .workers_with_earnings(company_id, window.start, window.end)
                    {
                        Ok(workers) => workers,
                        Err(err) => {
                            report.failures.push(PairFailure {
                                rule_id: rule.id.clone(),
                                worker_id: None,
                                error: err.to_string(),
                            });
                            continue;
                        }
                    }
                }
            };

            for worker_id in workers {
                report.pairs_evaluated += 1;
                match self.run_pair(&rule, company_id, &worker_id, as_of) {
                    Ok(outcome) => {
                        if outcome.status == PairStatus::Awarded {
                            report.awards_created += 1;
                            report.total_awarded_cents += outcome.awarded_cents;
                        }
                        report.outcomes.push(outcome);
                    }
                    Err(error) => report.failures.push(PairFailure {
                        rule_id: rule.id.clone(),
                        worker_id: Some(worker_id.clone()),
                        error,
                    }),
                }
            }
        }

        info!(
            company = %company_id.0,
            rules = report.rules_evaluated,
            pairs = report.pairs_evaluated,
            awards = report.awards_created,
            total_cents = report.total_awarded_cents,
            failures = report.failures.len(),
            "bonus engine run finished"
        );

        Ok(report)
    }

    pub fn list_awards(
        &self,
        company_id: &CompanyId,
        filters: &AwardFilters,
        page: PageRequest,
    ) -> Result<AwardPage, BonusServiceError> {
        Ok(self.ledger.list_awards(company_id, filters, page)?)
    }

    pub fn list_progress(
        &self,
        company_id: &CompanyId,
        filters: &ProgressFilters,
    ) -> Result<Vec<BonusProgress>, BonusServiceError> {
        Ok(self.ledger.list_progress(company_id, filters)?)
    }

    fn require_rule(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
    ) -> Result<BonusRule, BonusServiceError> {
        self.rules
            .fetch(company_id, rule_id)?
            .ok_or_else(|| BonusServiceError::RuleNotFound(rule_id.clone()))
    }

    fn rules_for_run(
        &self,
        company_id: &CompanyId,
        rule_id: Option<&RuleId>,
    ) -> Result<Vec<BonusRule>, BonusServiceError> {
        let mut rules = match rule_id {
            Some(id) => {
                let rule = self.require_rule(company_id, id)?;
                if rule.active {
                    vec![rule]
                } else {
                    // Inactive rules are skipped silently on the run path.
                    debug!(rule = %id.0, "skipping inactive rule");
                    Vec::new()
                }
            }
            None => self.rules.list_active(company_id)?,
        };
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(rules)
    }

    /// Shared read-only evaluation path: steps 2-6 of both preview and run.
    fn assess(
        &self,
        rule: &BonusRule,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        as_of: DateTime<Utc>,
    ) -> Result<Assessment, BonusServiceError> {
        let window = resolve_window(rule, company_id, worker_id, as_of, self.shifts.as_ref());

        let events = self.earnings.earnings_in_window(
            company_id,
            worker_id,
            &rule.config.metric,
            window.start,
            window.end,
        )?;
        let total_cents = qualifying_total(&events, &window, rule.config.include_refunds);
        let entitled = resolve_tier(total_cents, &rule.config.tiers);

        let key = ProgressKey::new(
            company_id.clone(),
            rule.id.clone(),
            worker_id.clone(),
            &window,
        );
        let progress = self.ledger.progress(&key)?;
        let last_observed_steps = progress
            .as_ref()
            .map(|row| row.last_observed_steps)
            .unwrap_or(0);

        let entitled_steps = entitled.map(|tier| tier.steps).unwrap_or(0);
        let delta_steps = entitled_steps as i64 - last_observed_steps as i64;

        let window_awarded = if rule.config.award_once_per_window {
            self.ledger.award_in_window(&key)?.is_some()
        } else {
            false
        };

        let expected_award_cents = if delta_steps > 0 && !window_awarded {
            entitled.map(|tier| tier.band.bonus_cents).unwrap_or(0)
        } else {
            0
        };

        Ok(Assessment {
            window,
            total_cents,
            entitled,
            last_observed_steps,
            has_progress_row: progress.is_some(),
            delta_steps,
            window_awarded,
            expected_award_cents,
        })
    }

    /// Evaluate and, when payable, commit one pair. Conflicting ledger
    /// writes are retried a bounded number of times with a short backoff,
    /// re-reading progress each attempt.
    fn run_pair(
        &self,
        rule: &BonusRule,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        as_of: DateTime<Utc>,
    ) -> Result<PairOutcome, String> {
        let mut attempt = 0;
        loop {
            let assessment = self
                .assess(rule, company_id, worker_id, as_of)
                .map_err(|err| err.to_string())?;
            let now = Utc::now();
            let key = ProgressKey::new(
                company_id.clone(),
                rule.id.clone(),
                worker_id.clone(),
                &assessment.window,
            );

            if assessment.expected_award_cents == 0 || assessment.delta_steps <= 0 {
                // Nothing payable. Open the window's progress row on first
                // sight so rollovers leave a zero-step record behind, but
                // never touch an existing row.
                if !assessment.has_progress_row {
                    self.ledger
                        .record_progress(key.row(0, now))
                        .map_err(|err| err.to_string())?;
                }
                return Ok(PairOutcome {
                    rule_id: rule.id.clone(),
                    worker_id: worker_id.clone(),
                    status: PairStatus::Skipped,
                    awarded_cents: 0,
                    steps_awarded: 0,
                    reason: describe_assessment(rule, &assessment),
                });
            }

            let entitled_steps = assessment.entitled_steps();
            let steps_awarded = if rule.config.award_once_per_window {
                // The single award for this window reflects the full
                // entitlement at decision time.
                entitled_steps
            } else {
                assessment.delta_steps as u32
            };
            let tier = assessment
                .entitled
                .expect("payable assessment resolves a tier");

            let award = BonusAward {
                id: next_award_id(),
                company_id: company_id.clone(),
                rule_id: rule.id.clone(),
                worker_id: worker_id.clone(),
                window_start: assessment.window.start,
                window_end: assessment.window.end,
                steps_awarded,
                bonus_amount_cents: assessment.expected_award_cents,
                currency: self.engine.currency.clone(),
                awarded_at: now,
                reason: describe_assessment(rule, &assessment),
                payload: AwardSnapshot {
                    tier_steps: tier.steps,
                    tier: tier.band,
                    window_total_cents: assessment.total_cents,
                    config: rule.config.clone(),
                },
            };
            let progress = key.row(entitled_steps, now);

            match self.ledger.commit_award(award, progress) {
                Ok(award) => {
                    return Ok(PairOutcome {
                        rule_id: rule.id.clone(),
                        worker_id: worker_id.clone(),
                        status: PairStatus::Awarded,
                        awarded_cents: award.bonus_amount_cents,
                        steps_awarded: award.steps_awarded,
                        reason: award.reason,
                    });
                }
                Err(LedgerError::Conflict) if attempt < self.engine.conflict_retry_limit => {
                    attempt += 1;
                    debug!(
                        rule = %rule.id.0,
                        worker = %worker_id.0,
                        attempt,
                        "ledger write conflict, retrying"
                    );
                    std::thread::sleep(self.engine.conflict_backoff * attempt);
                }
                Err(err) => return Err(err.to_string()),
            }
        }
    }
}

/// Human-readable explanation of an assessment for previews, award records,
/// and run reports.
fn describe_assessment(rule: &BonusRule, assessment: &Assessment) -> String {
    let window_note = match assessment.window.source {
        WindowSource::CalendarFallback { reason } => {
            format!(" [{} window fallback: {}]", rule.window.label(), reason.label())
        }
        _ => String::new(),
    };

    let Some(tier) = assessment.entitled else {
        return format!(
            "window total {} cents is below the lowest tier minimum{}",
            assessment.total_cents, window_note
        );
    };

    if assessment.window_awarded && assessment.delta_steps > 0 {
        return format!(
            "window already awarded; total {} cents would reach tier {} but at most one award is issued per window{}",
            assessment.total_cents, tier.steps, window_note
        );
    }

    if assessment.delta_steps <= 0 {
        return format!(
            "tier {} already reflected in progress for this window (total {} cents){}",
            assessment.last_observed_steps, assessment.total_cents, window_note
        );
    }

    if tier.band.bonus_cents == 0 {
        return format!(
            "window total {} cents resolves to tier {} which pays no bonus{}",
            assessment.total_cents, tier.steps, window_note
        );
    }

    format!(
        "window total {} cents reached tier {} (minimum {} cents): {} new step(s) pay {} cents{}",
        assessment.total_cents,
        tier.steps,
        tier.band.min_amount_cents,
        assessment.delta_steps,
        tier.band.bonus_cents,
        window_note
    )
}
