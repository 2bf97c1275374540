use chatter_ops::config::BonusConfig;
use chatter_ops::workflows::bonus::{
    advances_progress, AwardFilters, AwardLedger, AwardPage, BonusAward, BonusProgress, BonusRule,
    CompanyId, EarningsError, EarningsEvent, EarningsSource, EngineConfig, LedgerError,
    PageRequest, ProgressFilters, ProgressKey, ProgressWrite, RuleId, RuleRepository,
    RuleStoreError, ShiftDirectory, ShiftLookupError, ShiftSpan, WorkerId,
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) fn engine_config(bonus: &BonusConfig) -> EngineConfig {
    EngineConfig {
        currency: bonus.currency.clone(),
        ..EngineConfig::default()
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryRuleStore {
    rules: Arc<Mutex<HashMap<(CompanyId, RuleId), BonusRule>>>,
}

impl RuleRepository for InMemoryRuleStore {
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
pub(crate) struct InMemoryEarningsFeed {
    events: Arc<Mutex<Vec<(CompanyId, EarningsEvent)>>>,
}

impl InMemoryEarningsFeed {
    pub(crate) fn push(&self, company_id: &CompanyId, event: EarningsEvent) {
        self.events
            .lock()
            .expect("earnings mutex poisoned")
            .push((company_id.clone(), event));
    }
}

impl EarningsSource for InMemoryEarningsFeed {
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

#[derive(Default, Clone)]
pub(crate) struct InMemoryShiftBook {
    shifts: Arc<Mutex<HashMap<(CompanyId, WorkerId, NaiveDate), ShiftSpan>>>,
}

impl InMemoryShiftBook {
    pub(crate) fn set(
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

impl ShiftDirectory for InMemoryShiftBook {
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

#[derive(Default)]
struct LedgerInner {
    progress: HashMap<ProgressKey, BonusProgress>,
    awards: Vec<BonusAward>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAwardLedger {
    inner: Arc<Mutex<LedgerInner>>,
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

impl AwardLedger for InMemoryAwardLedger {
    fn progress(&self, key: &ProgressKey) -> Result<Option<BonusProgress>, LedgerError> {
        let guard = self.inner.lock().expect("ledger mutex poisoned");
        Ok(guard.progress.get(key).cloned())
    }

    fn record_progress(&self, row: BonusProgress) -> Result<ProgressWrite, LedgerError> {
        let mut guard = self.inner.lock().expect("ledger mutex poisoned");
        let key = key_of(&row);
        if advances_progress(guard.progress.get(&key), row.last_observed_steps) {
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

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}
