use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::domain::{CompanyId, RuleDraft, RuleId, WorkerId};
use super::repository::{
    AwardFilters, AwardLedger, EarningsSource, PageRequest, ProgressFilters, RuleRepository,
    ShiftDirectory,
};
use super::service::{BonusAwardService, BonusServiceError, RunRequest};

/// Router builder exposing the bonus admin and engine endpoints.
pub fn bonus_router<R, E, S, L>(service: Arc<BonusAwardService<R, E, S, L>>) -> Router
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    Router::new()
        .route("/api/v1/bonus/rules", post(create_rule_handler::<R, E, S, L>))
        .route(
            "/api/v1/bonus/rules/:rule_id",
            post(update_rule_handler::<R, E, S, L>),
        )
        .route(
            "/api/v1/bonus/rules/:rule_id/activation",
            post(activation_handler::<R, E, S, L>),
        )
        .route(
            "/api/v1/bonus/rules/:rule_id/clone",
            post(clone_rule_handler::<R, E, S, L>),
        )
        .route(
            "/api/v1/bonus/rules/:rule_id/preview",
            post(preview_handler::<R, E, S, L>),
        )
        .route("/api/v1/bonus/run", post(run_handler::<R, E, S, L>))
        .route("/api/v1/bonus/awards", get(awards_handler::<R, E, S, L>))
        .route("/api/v1/bonus/progress", get(progress_handler::<R, E, S, L>))
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRuleRequest {
    pub(crate) company_id: CompanyId,
    #[serde(flatten)]
    pub(crate) draft: RuleDraft,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActivationRequest {
    pub(crate) company_id: CompanyId,
    pub(crate) active: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CloneRuleRequest {
    pub(crate) company_id: CompanyId,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewRequest {
    pub(crate) company_id: CompanyId,
    pub(crate) worker_id: WorkerId,
    pub(crate) as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunEngineRequest {
    pub(crate) company_id: CompanyId,
    #[serde(default)]
    pub(crate) rule_id: Option<RuleId>,
    #[serde(default)]
    pub(crate) worker_id: Option<WorkerId>,
    #[serde(default)]
    pub(crate) as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AwardListQuery {
    pub(crate) company_id: String,
    #[serde(default)]
    pub(crate) worker_id: Option<String>,
    #[serde(default)]
    pub(crate) rule_id: Option<String>,
    #[serde(default)]
    pub(crate) from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) min_amount_cents: Option<i64>,
    #[serde(default)]
    pub(crate) max_amount_cents: Option<i64>,
    #[serde(default)]
    pub(crate) page: Option<u32>,
    #[serde(default)]
    pub(crate) per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressListQuery {
    pub(crate) company_id: String,
    #[serde(default)]
    pub(crate) worker_id: Option<String>,
    #[serde(default)]
    pub(crate) rule_id: Option<String>,
}

pub(crate) async fn create_rule_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    axum::Json(request): axum::Json<CreateRuleRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    match service.create_rule(&request.company_id, request.draft) {
        Ok(rule) => (StatusCode::CREATED, axum::Json(rule)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_rule_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Path(rule_id): Path<String>,
    axum::Json(request): axum::Json<CreateRuleRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let rule_id = RuleId(rule_id);
    match service.update_rule(&request.company_id, &rule_id, request.draft) {
        Ok(rule) => (StatusCode::OK, axum::Json(rule)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn activation_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Path(rule_id): Path<String>,
    axum::Json(request): axum::Json<ActivationRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let rule_id = RuleId(rule_id);
    match service.set_rule_active(&request.company_id, &rule_id, request.active) {
        Ok(rule) => (StatusCode::OK, axum::Json(rule)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn clone_rule_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Path(rule_id): Path<String>,
    axum::Json(request): axum::Json<CloneRuleRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let rule_id = RuleId(rule_id);
    match service.clone_rule(&request.company_id, &rule_id, request.name) {
        Ok(rule) => (StatusCode::CREATED, axum::Json(rule)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn preview_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Path(rule_id): Path<String>,
    axum::Json(request): axum::Json<PreviewRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let rule_id = RuleId(rule_id);
    match service.preview(
        &request.company_id,
        &rule_id,
        &request.worker_id,
        request.as_of,
    ) {
        Ok(preview) => (StatusCode::OK, axum::Json(preview)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn run_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    axum::Json(request): axum::Json<RunEngineRequest>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let run = RunRequest {
        rule_id: request.rule_id,
        worker_id: request.worker_id,
        as_of: request.as_of,
    };
    match service.run(&request.company_id, run) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn awards_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Query(query): Query<AwardListQuery>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let company_id = CompanyId(query.company_id);
    let filters = AwardFilters {
        worker_id: query.worker_id.map(WorkerId),
        rule_id: query.rule_id.map(RuleId),
        from: query.from,
        to: query.to,
        min_amount_cents: query.min_amount_cents,
        max_amount_cents: query.max_amount_cents,
    };
    let defaults = PageRequest::default();
    let page = PageRequest {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    };

    match service.list_awards(&company_id, &filters, page) {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn progress_handler<R, E, S, L>(
    State(service): State<Arc<BonusAwardService<R, E, S, L>>>,
    Query(query): Query<ProgressListQuery>,
) -> Response
where
    R: RuleRepository + 'static,
    E: EarningsSource + 'static,
    S: ShiftDirectory + 'static,
    L: AwardLedger + 'static,
{
    let company_id = CompanyId(query.company_id);
    let filters = ProgressFilters {
        worker_id: query.worker_id.map(WorkerId),
        rule_id: query.rule_id.map(RuleId),
    };

    match service.list_progress(&company_id, &filters) {
        Ok(rows) => (StatusCode::OK, axum::Json(rows)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: BonusServiceError) -> Response {
    let status = match &error {
        BonusServiceError::RuleNotFound(_) => StatusCode::NOT_FOUND,
        BonusServiceError::Earnings(super::repository::EarningsError::WorkerNotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        BonusServiceError::InvalidRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BonusServiceError::Rules(super::repository::RuleStoreError::Conflict) => {
            StatusCode::CONFLICT
        }
        BonusServiceError::Ledger(super::repository::LedgerError::Conflict) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
