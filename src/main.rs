use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signalbot::config::{redact_url, AppConfig};
use signalbot::db::PostgresStore;
use signalbot::decision_log::DecisionLog;
use signalbot::exchange::{create_client, ClientPool};
use signalbot::execution::{Pipeline, Scheduler};
use signalbot::notify::LogNotifier;
use signalbot::persistence::RedisRiskStore;
use signalbot::store::{ConfigStore, MemoryRiskStore, RiskStateStore};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "signalbot")]
#[command(about = "RSI/EMA signal bots for Bybit and OKX", long_about = None)]
struct Cli {
    /// Config file (defaults, then this file, then SIGNALBOT__* env vars)
    #[arg(long, default_value = signalbot::config::DEFAULT_CONFIG_FILE)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every active bot on the configured tick until Ctrl+C
    Run,
    /// Run a single cycle for one bot and exit
    Once {
        #[arg(long)]
        bot: i64,
    },
    /// Clear a circuit-breaker pause
    Resume {
        #[arg(long)]
        bot: i64,
    },
    /// Show an order as the exchange reports it
    Order {
        #[arg(long)]
        bot: i64,
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config).context("Failed to load configuration")?;
    setup_logging(&config.log_filter);

    let store = Arc::new(
        PostgresStore::new(&config.database_url)
            .await
            .context("Failed to connect to Postgres")?,
    );
    tracing::info!("✓ Postgres connected, migrations applied");

    let risk = connect_risk_store(&config).await;

    match cli.command {
        Commands::Run => run(config, store, risk).await,
        Commands::Once { bot } => {
            let pipeline = build_pipeline(&config, store, risk);
            let outcome = pipeline
                .run_cycle(bot)
                .await
                .with_context(|| format!("Cycle for bot {} failed", bot))?;
            tracing::info!("Bot {}: {} - {}", bot, outcome.signal, outcome.reason);
            if let Some(trade) = outcome.trade {
                tracing::info!(
                    "  Trade {} {} {} @ {} ({})",
                    trade.id,
                    trade.side.as_str(),
                    trade.quantity,
                    trade.price,
                    trade.status.as_str()
                );
            }
            Ok(())
        }
        Commands::Resume { bot } => {
            let pipeline = build_pipeline(&config, store, risk);
            pipeline
                .resume(bot)
                .await
                .with_context(|| format!("Failed to resume bot {}", bot))
        }
        Commands::Order { bot, id } => show_order(&config, store.as_ref(), bot, &id).await,
    }
}

fn setup_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_risk_store(config: &AppConfig) -> Arc<dyn RiskStateStore> {
    let Some(redis_url) = config.redis_url.as_deref() else {
        tracing::info!("REDIS_URL not set, risk state kept in memory");
        return Arc::new(MemoryRiskStore::new());
    };

    match RedisRiskStore::new(redis_url).await {
        Ok(store) => {
            tracing::info!("✓ Redis risk state at {}", redact_url(redis_url));
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), risk state kept in memory",
                e
            );
            Arc::new(MemoryRiskStore::new())
        }
    }
}

fn build_pipeline(
    config: &AppConfig,
    store: Arc<PostgresStore>,
    risk: Arc<dyn RiskStateStore>,
) -> Pipeline {
    Pipeline::new(
        store.clone(),
        store.clone(),
        store as Arc<dyn DecisionLog>,
        risk,
        Arc::new(LogNotifier),
        Arc::new(ClientPool::new(config.exchange.settings())),
        config.candle_limit,
        config.cycle_deadline(),
    )
}

async fn run(
    config: AppConfig,
    store: Arc<PostgresStore>,
    risk: Arc<dyn RiskStateStore>,
) -> Result<()> {
    tracing::info!("🚀 signalbot starting");

    let bots = store
        .active_bots()
        .await
        .context("Failed to load active bots")?;
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Tick: every {}s", config.tick_interval_secs);
    tracing::info!("  Cycle deadline: {}s", config.cycle_deadline_secs);
    tracing::info!("  Max concurrent bots: {}", config.max_concurrent_bots);
    tracing::info!("  Active bots: {}", bots.len());
    for bot in &bots {
        tracing::info!(
            "    - #{} {} {} {} ({}{})",
            bot.id,
            bot.bot_type.as_str(),
            bot.symbol,
            bot.timeframe,
            bot.strategy.as_str(),
            if bot.dry_run { ", dry-run" } else { "" }
        );
    }

    let pipeline = Arc::new(build_pipeline(&config, store, risk));
    let scheduler = Arc::new(Scheduler::new(
        pipeline,
        config.tick_interval(),
        config.max_concurrent_bots,
    ));

    let scheduler_task = tokio::spawn(scheduler.run());
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = scheduler_task => {
            tracing::error!("Scheduler exited: {:?}", result);
        }
    }

    tracing::info!("👋 signalbot stopped");
    Ok(())
}

async fn show_order(config: &AppConfig, store: &PostgresStore, bot_id: i64, order_id: &str) -> Result<()> {
    let bot = store
        .bot(bot_id)
        .await?
        .with_context(|| format!("Bot {} not found", bot_id))?;
    let account = store
        .exchange_account(bot.account_id)
        .await?
        .with_context(|| format!("Exchange account {} not found", bot.account_id))?;

    let client = create_client(&account, bot.bot_type, &config.exchange.settings())?;
    let order = client.get_order(&bot.symbol, order_id).await?;
    tracing::info!(
        "Order {} on {}: {:?}, filled {} @ {}, fee {}",
        order.order_id,
        account.exchange,
        order.state,
        order.filled_qty,
        order
            .avg_price
            .map_or_else(|| "-".to_string(), |p| p.to_string()),
        order.fee
    );
    Ok(())
}
