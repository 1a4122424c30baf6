//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::{Config, LogFormat};
use checkout::{
    CheckoutContext, HttpGatewayConfig, HttpPaymentGateway, InMemoryPaymentGateway,
    PaymentGateway, TracingNotificationSink, WebhookVerifier,
};
use domain::{
    InMemoryCartRepository, InMemoryOrderRepository, PostgresCartRepository,
    PostgresOrderRepository,
};
use ledger::{InMemoryLedger, PostgresLedger};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn payment_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match &config.payment_gateway_url {
        Some(base_url) => {
            let api_key = config.payment_gateway_api_key.clone().unwrap_or_else(|| {
                tracing::warn!("PAYMENT_GATEWAY_API_KEY not set; gateway calls will be rejected");
                String::new()
            });
            let gateway = HttpPaymentGateway::new(HttpGatewayConfig {
                base_url: base_url.clone(),
                api_key,
                callback_url: config.payment_callback_url.clone(),
                error_url: config.payment_error_url.clone(),
            })
            .expect("failed to build payment gateway client");
            tracing::info!(%base_url, "using HTTP payment gateway");
            Arc::new(gateway)
        }
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set; using in-memory payment gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    }
}

async fn checkout_context(config: &Config) -> CheckoutContext {
    let gateway = payment_gateway(config);
    let notifier = Arc::new(TracingNotificationSink);

    match &config.database_url {
        Some(url) => {
            let ledger = PostgresLedger::connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            ledger
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let pool = ledger.pool().clone();
            tracing::info!("using PostgreSQL stores");
            CheckoutContext {
                ledger: Arc::new(ledger),
                orders: Arc::new(PostgresOrderRepository::new(pool.clone())),
                carts: Arc::new(PostgresCartRepository::new(pool)),
                gateway,
                notifier,
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores");
            CheckoutContext {
                ledger: Arc::new(InMemoryLedger::new()),
                orders: Arc::new(InMemoryOrderRepository::new()),
                carts: Arc::new(InMemoryCartRepository::new()),
                gateway,
                notifier,
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);
    tracing::debug!(?config, "configuration loaded");

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire stores, collaborators and workflows
    let ctx = checkout_context(&config).await;
    let verifier = match &config.webhook_secret {
        Some(secret) => Some(WebhookVerifier::new(
            secret.clone(),
            config.webhook_tolerance_secs,
        )),
        None => {
            tracing::warn!("WEBHOOK_SECRET not set; webhook notifications will be rejected");
            None
        }
    };
    let state = Arc::new(AppState::new(ctx, verifier));

    // 4. Build the application
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
