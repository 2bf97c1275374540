use crate::cli::ServeArgs;
use crate::infra::{
    engine_config, AppState, InMemoryAwardLedger, InMemoryEarningsFeed, InMemoryRuleStore,
    InMemoryShiftBook,
};
use crate::routes::with_bonus_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chatter_ops::config::AppConfig;
use chatter_ops::error::AppError;
use chatter_ops::telemetry;
use chatter_ops::workflows::bonus::BonusAwardService;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let rules = Arc::new(InMemoryRuleStore::default());
    let earnings = Arc::new(InMemoryEarningsFeed::default());
    let shifts = Arc::new(InMemoryShiftBook::default());
    let ledger = Arc::new(InMemoryAwardLedger::default());
    let bonus_service = Arc::new(BonusAwardService::new(
        rules,
        earnings,
        shifts,
        ledger,
        engine_config(&config.bonus),
    ));

    let app = with_bonus_routes(bonus_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "chatter bonus engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
