use bigdecimal::BigDecimal;
use jewelry_backend::api::{self, PaymentState};
use jewelry_backend::config::AppConfig;
use jewelry_backend::database::memory::InMemoryStore;
use jewelry_backend::database::order_repository::{Order, PgOrderRepository, ShippingAddress};
use jewelry_backend::database::payment_transaction_repository::PgTransactionStore;
use jewelry_backend::database::repository::{OrderRepository, TransactionStore};
use jewelry_backend::database::{init_pool_from_config, run_migrations};
use jewelry_backend::health::HealthChecker;
use jewelry_backend::logging::init_tracing;
use jewelry_backend::payments::BankartGateway;
use jewelry_backend::services::notification::{email_sender_from_config, NotificationService};
use jewelry_backend::services::OrderStateCoordinator;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Order used to try the payment flow without a database.
async fn seed_demo_order(store: &InMemoryStore) -> anyhow::Result<Order> {
    let order = Order::new_pending(
        "demo.customer@example.com",
        Some(ShippingAddress {
            full_name: "Demo Customer".to_string(),
            address: "Main Street 1".to_string(),
            city: "Ljubljana".to_string(),
            country: "SI".to_string(),
            postal_code: "1000".to_string(),
            phone: "+38640000000".to_string(),
        }),
        BigDecimal::from_str("49.99")?,
    );
    store.insert_order(order.clone()).await;
    Ok(order)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        gateway = ?config.gateway,
        "Starting jewelry backend service"
    );

    let (orders, transactions, db_pool): (
        Arc<dyn OrderRepository>,
        Arc<dyn TransactionStore>,
        Option<sqlx::PgPool>,
    ) = if config.skip_externals {
        info!("Skipping database initialization (SKIP_EXTERNALS=true), using in-memory storage");
        let store = Arc::new(InMemoryStore::new());
        let demo = seed_demo_order(&store).await?;
        info!(order_id = %demo.id, total = %demo.total, "Seeded demo order");
        let orders: Arc<dyn OrderRepository> = store.clone();
        let transactions: Arc<dyn TransactionStore> = store;
        (orders, transactions, None)
    } else {
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        run_migrations(&pool).await?;
        let orders: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(pool.clone()));
        let transactions: Arc<dyn TransactionStore> =
            Arc::new(PgTransactionStore::new(pool.clone()));
        (orders, transactions, Some(pool))
    };

    let gateway = Arc::new(BankartGateway::new(config.gateway.clone())?);

    let sender = email_sender_from_config(&config.email)?;
    if config.email.sendgrid_api_key.is_none() {
        warn!("SENDGRID_API_KEY not set, emails are only logged");
    }
    let notifications = Arc::new(NotificationService::new(
        sender,
        config.email.admin_address.clone(),
    ));

    let coordinator = Arc::new(OrderStateCoordinator::new(
        orders,
        transactions,
        gateway,
        notifications,
        config.gateway.callback_base_url.clone(),
    ));

    let app = api::app(
        PaymentState { coordinator },
        HealthChecker::new(db_pool),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
