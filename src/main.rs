use std::sync::{Arc, Mutex};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bikerent::config::AppConfig;
use bikerent::db;
use bikerent::handlers;
use bikerent::services::notifications::webhook::WebhookNotifier;
use bikerent::services::notifications::{LogNotifier, Notifier};
use bikerent::services::payments::razorpay::RazorpayGateway;
use bikerent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    anyhow::ensure!(
        !config.razorpay_key_id.is_empty() && !config.razorpay_key_secret.is_empty(),
        "RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET must be set"
    );
    if config.razorpay_webhook_secret.is_empty() {
        tracing::warn!("RAZORPAY_WEBHOOK_SECRET not set, webhook deliveries will be rejected");
    }

    let conn = db::init_db(&config.database_url)?;

    let payments = RazorpayGateway::new(
        config.razorpay_key_id.clone(),
        config.razorpay_key_secret.clone(),
    );

    let notifier: Box<dyn Notifier> = if config.notify_url.is_empty() {
        tracing::info!("NOTIFY_URL not set, notifications go to the log");
        Box::new(LogNotifier)
    } else {
        tracing::info!("sending notifications to {}", config.notify_url);
        Box::new(WebhookNotifier::new(config.notify_url.clone()))
    };

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(payments),
        notifier,
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(
        gst_rate = %config.gst_rate,
        cutoff_hours = config.cancellation_cutoff_hours,
        "starting server on {addr}"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
