use crate::infra::{
    engine_config, parse_timestamp, InMemoryAwardLedger, InMemoryEarningsFeed, InMemoryRuleStore,
    InMemoryShiftBook,
};
use chatter_ops::config::AppConfig;
use chatter_ops::error::AppError;
use chatter_ops::workflows::bonus::{
    BonusAwardService, CompanyId, EarningsEvent, EarningsKind, EngineRunReport, RuleConfig,
    RuleDraft, RunRequest, ShiftSpan, TierBand, WindowKind, WorkerId, EARNINGS_METRIC,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Evaluation instant (RFC 3339). Defaults to the seeded demo day.
    #[arg(long, value_parser = parse_timestamp)]
    pub(crate) as_of: Option<DateTime<Utc>>,
    /// Cap the seeded rule at one award per window.
    #[arg(long)]
    pub(crate) once_per_window: bool,
}

fn demo_instant(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, hour, minute, 0)
        .single()
        .expect("valid demo timestamp")
}

fn seed_earning(worker: &WorkerId, amount_cents: i64, at: DateTime<Utc>) -> EarningsEvent {
    EarningsEvent {
        worker_id: worker.clone(),
        amount_cents,
        occurred_at: at,
        kind: if amount_cents < 0 {
            EarningsKind::Adjustment
        } else {
            EarningsKind::Unlock
        },
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;

    let rules = Arc::new(InMemoryRuleStore::default());
    let earnings = Arc::new(InMemoryEarningsFeed::default());
    let shifts = Arc::new(InMemoryShiftBook::default());
    let ledger = Arc::new(InMemoryAwardLedger::default());
    let service = BonusAwardService::new(
        rules,
        earnings.clone(),
        shifts.clone(),
        ledger,
        engine_config(&config.bonus),
    );

    let company = CompanyId("demo-agency".to_string());
    let alice = WorkerId("chatter-alice".to_string());
    let billie = WorkerId("chatter-billie".to_string());

    let rule = service
        .create_rule(
            &company,
            RuleDraft {
                name: "Daily unlock bonus".to_string(),
                window: WindowKind::CalendarDay,
                timezone: chrono_tz::America::Chicago,
                priority: 10,
                active: true,
                config: RuleConfig {
                    metric: EARNINGS_METRIC.to_string(),
                    tiers: vec![
                        TierBand {
                            min_amount_cents: 0,
                            bonus_cents: 0,
                        },
                        TierBand {
                            min_amount_cents: 10_000,
                            bonus_cents: 1000,
                        },
                        TierBand {
                            min_amount_cents: 25_000,
                            bonus_cents: 3500,
                        },
                    ],
                    include_refunds: false,
                    shift_based: false,
                    award_once_per_window: args.once_per_window,
                },
            },
        )
        .map_err(AppError::from)?;

    // A morning and an afternoon sale for Alice, one refund, and a single
    // large unlock for Billie during her recorded shift.
    earnings.push(&company, seed_earning(&alice, 6000, demo_instant(14, 0)));
    earnings.push(&company, seed_earning(&alice, 5000, demo_instant(19, 0)));
    earnings.push(&company, seed_earning(&alice, -500, demo_instant(19, 30)));
    earnings.push(&company, seed_earning(&billie, 26_000, demo_instant(16, 0)));
    shifts.set(
        &company,
        &billie,
        NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid demo date"),
        ShiftSpan {
            start: demo_instant(13, 0),
            end: demo_instant(21, 0),
        },
    );

    let as_of = args.as_of.unwrap_or_else(|| demo_instant(20, 0));

    println!("Chatter bonus engine demo");
    println!("Rule: {} ({})", rule.name, rule.id.0);
    println!(
        "Windows: {} in {}, once-per-window: {}",
        rule.window.label(),
        rule.timezone,
        rule.config.award_once_per_window
    );

    let preview = service
        .preview(&company, &rule.id, &alice, as_of)
        .map_err(AppError::from)?;
    println!("\nPreview for {}", alice.0);
    println!(
        "- window {} -> {}",
        preview.window.start, preview.window.end
    );
    println!("- total {} cents", preview.total_cents);
    println!(
        "- entitled tier {} paying {} cents, expected award {} cents",
        preview.entitled_steps, preview.entitled_bonus_cents, preview.expected_award_cents
    );
    println!("- {}", preview.reason);

    let report = service
        .run(
            &company,
            RunRequest {
                rule_id: None,
                worker_id: None,
                as_of: Some(as_of),
            },
        )
        .map_err(AppError::from)?;
    render_run_report("First engine run", &report);

    let rerun = service
        .run(
            &company,
            RunRequest {
                rule_id: None,
                worker_id: None,
                as_of: Some(as_of),
            },
        )
        .map_err(AppError::from)?;
    render_run_report("Second engine run (same window, idempotent)", &rerun);

    Ok(())
}

fn render_run_report(title: &str, report: &EngineRunReport) {
    println!("\n{title}");
    println!(
        "- {} rule(s), {} pair(s), {} award(s), {} cents total",
        report.rules_evaluated,
        report.pairs_evaluated,
        report.awards_created,
        report.total_awarded_cents
    );
    for outcome in &report.outcomes {
        println!(
            "- {} x {}: {:?}, {} cents ({})",
            outcome.rule_id.0, outcome.worker_id.0, outcome.status, outcome.awarded_cents,
            outcome.reason
        );
    }
    for failure in &report.failures {
        let worker = failure
            .worker_id
            .as_ref()
            .map(|worker| worker.0.as_str())
            .unwrap_or("*");
        println!("- FAILED {} x {}: {}", failure.rule_id.0, worker, failure.error);
    }
}
