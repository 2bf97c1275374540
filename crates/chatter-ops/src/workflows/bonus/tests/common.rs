use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::workflows::bonus::domain::{
    BonusAward, BonusProgress, BonusRule, CompanyId, EarningsEvent, EarningsKind, RuleConfig,
    RuleDraft, RuleId, ShiftSpan, TierBand, WindowKind, WorkerId, EARNINGS_METRIC,
};
use crate::workflows::bonus::progress::{advances, ProgressKey};
use crate::workflows::bonus::repository::{
    AwardFilters, AwardLedger, AwardPage, EarningsError, EarningsSource, LedgerError, PageRequest,
    ProgressFilters, ProgressWrite, RuleRepository, RuleStoreError, ShiftDirectory,
    ShiftLookupError,
};
use crate::workflows::bonus::service::{BonusAwardService, EngineConfig};

pub(super) const CHICAGO: Tz = chrono_tz::America::Chicago;

pub(super) fn company() -> CompanyId {
    CompanyId("agency-01".to_string())
}

pub(super) fn worker(suffix: &str) -> WorkerId {
    WorkerId(format!("chatter-{suffix}"))
}

pub(super) fn utc(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn earning(worker_id: &WorkerId, amount_cents: i64, at: DateTime<Utc>) -> EarningsEvent {
    EarningsEvent {
        worker_id: worker_id.clone(),
        amount_cents,
        occurred_at: at,
        kind: if amount_cents < 0 {
            EarningsKind::Adjustment
        } else {
            EarningsKind::Unlock
        },
    }
}

pub(super) fn tiers(bands: &[(i64, i64)]) -> Vec<TierBand> {
    bands
        .iter()
        .map(|(min_amount_cents, bonus_cents)| TierBand {
            min_amount_cents: *min_amount_cents,
            bonus_cents: *bonus_cents,
        })
        .collect()
}

pub(super) fn draft(window: WindowKind, bands: &[(i64, i64)]) -> RuleDraft {
    RuleDraft {
        name: "Daily unlock bonus".to_string(),
        window,
        timezone: CHICAGO,
        priority: 10,
        active: true,
        config: RuleConfig {
            metric: EARNINGS_METRIC.to_string(),
            tiers: tiers(bands),
            include_refunds: false,
            shift_based: false,
            award_once_per_window: false,
        },
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryRules {
    rules: Arc<Mutex<HashMap<(CompanyId, RuleId), BonusRule>>>,
}

impl RuleRepository for MemoryRules {
    fn insert(&self, rule: BonusRule) -> Result<BonusRule, RuleStoreError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        let key = (rule.company_id.clone(), rule.id.clone());
        if guard.contains_key(&key) {
            return Err(RuleStoreError::Conflict);
        }
        guard.insert(key, rule.clone());
        Ok(rule)
    }

    fn update(&self, rule: BonusRule) -> Result<BonusRule, RuleStoreError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        let key = (rule.company_id.clone(), rule.id.clone());
        if !guard.contains_key(&key) {
            return Err(RuleStoreError::NotFound);
        }
        guard.insert(key, rule.clone());
        Ok(rule)
    }

    fn fetch(
        &self,
        company_id: &CompanyId,
        id: &RuleId,
    ) -> Result<Option<BonusRule>, RuleStoreError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        Ok(guard.get(&(company_id.clone(), id.clone())).cloned())
    }

    fn list_active(&self, company_id: &CompanyId) -> Result<Vec<BonusRule>, RuleStoreError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        Ok(guard
            .values()
            .filter(|rule| &rule.company_id == company_id && rule.active)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryEarnings {
    events: Arc<Mutex<Vec<(CompanyId, EarningsEvent)>>>,
}

impl MemoryEarnings {
    pub(super) fn push(&self, company_id: &CompanyId, event: EarningsEvent) {
        self.events
            .lock()
            .expect("earnings mutex poisoned")
            .push((company_id.clone(), event));
    }
}

impl EarningsSource for MemoryEarnings {
    fn earnings_in_window(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        _metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EarningsEvent>, EarningsError> {
        let guard = self.events.lock().expect("earnings mutex poisoned");
        Ok(guard
            .iter()
            .filter(|(owner, event)| {
                owner == company_id
                    && &event.worker_id == worker_id
                    && event.occurred_at >= start
                    && event.occurred_at < end
            })
            .map(|(_, event)| event.clone())
            .collect())
    }

    fn workers_with_earnings(
        &self,
        company_id: &CompanyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>, EarningsError> {
        let guard = self.events.lock().expect("earnings mutex poisoned");
        let mut workers: Vec<WorkerId> = Vec::new();
        for (owner, event) in guard.iter() {
            if owner == company_id
                && event.occurred_at >= start
                && event.occurred_at < end
                && !workers.contains(&event.worker_id)
            {
                workers.push(event.worker_id.clone());
            }
        }
        workers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(workers)
    }
}

/// Earnings source that refuses one worker; batch isolation tests use it.
#[derive(Clone)]
pub(super) struct BrokenWorkerEarnings {
    pub(super) inner: MemoryEarnings,
    pub(super) broken: WorkerId,
}

impl EarningsSource for BrokenWorkerEarnings {
    fn earnings_in_window(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EarningsEvent>, EarningsError> {
        if worker_id == &self.broken {
            return Err(EarningsError::Unavailable("earnings shard offline".to_string()));
        }
        self.inner
            .earnings_in_window(company_id, worker_id, metric, start, end)
    }

    fn workers_with_earnings(
        &self,
        company_id: &CompanyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WorkerId>, EarningsError> {
        self.inner.workers_with_earnings(company_id, start, end)
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryShifts {
    shifts: Arc<Mutex<HashMap<(CompanyId, WorkerId, NaiveDate), ShiftSpan>>>,
}

impl MemoryShifts {
    pub(super) fn set(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        date: NaiveDate,
        span: ShiftSpan,
    ) {
        self.shifts
            .lock()
            .expect("shift mutex poisoned")
            .insert((company_id.clone(), worker_id.clone(), date), span);
    }
}

impl ShiftDirectory for MemoryShifts {
    fn shift_covering(
        &self,
        company_id: &CompanyId,
        worker_id: &WorkerId,
        date: NaiveDate,
    ) -> Result<Option<ShiftSpan>, ShiftLookupError> {
        let guard = self.shifts.lock().expect("shift mutex poisoned");
        Ok(guard
            .get(&(company_id.clone(), worker_id.clone(), date))
            .copied())
    }
}

/// Shift directory that always fails; window fallback tests use it.
pub(super) struct OfflineShifts;

impl ShiftDirectory for OfflineShifts {
    fn shift_covering(
        &self,
        _company_id: &CompanyId,
        _worker_id: &WorkerId,
        _date: NaiveDate,
    ) -> Result<Option<ShiftSpan>, ShiftLookupError> {
        Err(ShiftLookupError::Unavailable("directory offline".to_string()))
    }
}

#[derive(Default)]
struct LedgerInner {
    progress: HashMap<ProgressKey, BonusProgress>,
    awards: Vec<BonusAward>,
}

#[derive(Default, Clone)]
pub(super) struct MemoryLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl MemoryLedger {
    pub(super) fn awards(&self) -> Vec<BonusAward> {
        self.inner
            .lock()
            .expect("ledger mutex poisoned")
            .awards
            .clone()
    }

    pub(super) fn progress_rows(&self) -> Vec<BonusProgress> {
        self.inner
            .lock()
            .expect("ledger mutex poisoned")
            .progress
            .values()
            .cloned()
            .collect()
    }
}

fn key_of(row: &BonusProgress) -> ProgressKey {
    ProgressKey {
        company_id: row.company_id.clone(),
        rule_id: row.rule_id.clone(),
        worker_id: row.worker_id.clone(),
        window_start: row.window_start,
        window_end: row.window_end,
    }
}

fn award_matches(award: &BonusAward, key: &ProgressKey) -> bool {
    award.company_id == key.company_id
        && award.rule_id == key.rule_id
        && award.worker_id == key.worker_id
        && award.window_start == key.window_start
        && award.window_end == key.window_end
}

impl AwardLedger for MemoryLedger {
    fn progress(&self, key: &ProgressKey) -> Result<Option<BonusProgress>, LedgerError> {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        Ok(guard.progress.get(key).cloned())
    }

    fn record_progress(&self, row: BonusProgress) -> Result<ProgressWrite, LedgerError> {
        let mut guard = self.inner.lock().expect("ledger mutex poisoned");
        let key = key_of(&row);
        if advances(guard.progress.get(&key), row.last_observed_steps) {
            guard.progress.insert(key, row);
            Ok(ProgressWrite::Applied)
        } else {
            Ok(ProgressWrite::Superseded)
        }
    }

    fn award_in_window(&self, key: &ProgressKey) -> Result<Option<BonusAward>, LedgerError> {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        Ok(guard
            .awards
            .iter()
            .find(|award| award_matches(award, key))
            .cloned())
    }

    fn commit_award(
        &self,
        award: BonusAward,
        progress: BonusProgress,
    ) -> Result<BonusAward, LedgerError> {
        let mut guard = self.inner.lock().expect("ledger mutex poisoned");
        let key = key_of(&progress);

        if award.payload.config.award_once_per_window
            && guard.awards.iter().any(|row| award_matches(row, &key))
        {
            return Err(LedgerError::Conflict);
        }
        if let Some(existing) = guard.progress.get(&key) {
            if existing.last_observed_steps >= progress.last_observed_steps {
                return Err(LedgerError::Conflict);
            }
        }

        guard.awards.push(award.clone());
        guard.progress.insert(key, progress);
        Ok(award)
    }

    fn list_awards(
        &self,
        company_id: &CompanyId,
        filters: &AwardFilters,
        page: PageRequest,
    ) -> Result<AwardPage, LedgerError> {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        let mut matching: Vec<BonusAward> = guard
            .awards
            .iter()
            .filter(|award| &award.company_id == company_id && filters.matches(award))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.awarded_at.cmp(&a.awarded_at));

        let total_count = matching.len() as u64;
        let total_amount_cents = matching.iter().map(|award| award.bonus_amount_cents).sum();
        let rows = matching
            .into_iter()
            .skip(page.offset())
            .take(page.per_page as usize)
            .collect();

        Ok(AwardPage {
            rows,
            total_count,
            total_amount_cents,
        })
    }

    fn list_progress(
        &self,
        company_id: &CompanyId,
        filters: &ProgressFilters,
    ) -> Result<Vec<BonusProgress>, LedgerError> {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        Ok(guard
            .progress
            .values()
            .filter(|row| &row.company_id == company_id && filters.matches(row))
            .cloned()
            .collect())
    }
}

/// Ledger decorator that loses the first `failures` commits with a conflict.
#[derive(Clone)]
pub(super) struct ContendedLedger {
    pub(super) inner: MemoryLedger,
    failures: Arc<Mutex<u32>>,
}

impl ContendedLedger {
    pub(super) fn failing(inner: MemoryLedger, failures: u32) -> Self {
        Self {
            inner,
            failures: Arc::new(Mutex::new(failures)),
        }
    }
}

impl AwardLedger for ContendedLedger {
    fn progress(&self, key: &ProgressKey) -> Result<Option<BonusProgress>, LedgerError> {
        self.inner.progress(key)
    }

    fn record_progress(&self, row: BonusProgress) -> Result<ProgressWrite, LedgerError> {
        self.inner.record_progress(row)
    }

    fn award_in_window(&self, key: &ProgressKey) -> Result<Option<BonusAward>, LedgerError> {
        self.inner.award_in_window(key)
    }

    fn commit_award(
        &self,
        award: BonusAward,
        progress: BonusProgress,
    ) -> Result<BonusAward, LedgerError> {
        let mut remaining = self.failures.lock().expect("failure counter poisoned");
        if *remaining > 0 {
            *remaining -= 1;
            return Err(LedgerError::Conflict);
        }
        drop(remaining);
        self.inner.commit_award(award, progress)
    }

    fn list_awards(
        &self,
        company_id: &CompanyId,
        filters: &AwardFilters,
        page: PageRequest,
    ) -> Result<AwardPage, LedgerError> {
        self.inner.list_awards(company_id, filters, page)
    }

    fn list_progress(
        &self,
        company_id: &CompanyId,
        filters: &ProgressFilters,
    ) -> Result<Vec<BonusProgress>, LedgerError> {
        self.inner.list_progress(company_id, filters)
    }
}

pub(super) type MemoryService =
    BonusAwardService<MemoryRules, MemoryEarnings, MemoryShifts, MemoryLedger>;

pub(super) fn build_service() -> (
    MemoryService,
    Arc<MemoryRules>,
    Arc<MemoryEarnings>,
    Arc<MemoryShifts>,
    Arc<MemoryLedger>,
) {
    let rules = Arc::new(MemoryRules::default());
    let earnings = Arc::new(MemoryEarnings::default());
    let shifts = Arc::new(MemoryShifts::default());
    let ledger = Arc::new(MemoryLedger::default());
    let service = BonusAwardService::new(
        rules.clone(),
        earnings.clone(),
        shifts.clone(),
        ledger.clone(),
        EngineConfig::default(),
    );
    (service, rules, earnings, shifts, ledger)
}
