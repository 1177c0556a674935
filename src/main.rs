use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tg_progress::auth::AuthSettings;
use tg_progress::handlers::{self, BotState, Command};
use tg_progress::http::{self, AppState};
use tg_progress::identity::{IdentityService, SupabaseClient};
use tg_progress::{config, db, outbox};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.app.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/progress.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let purged = db::purge_expired_sessions(&pool, chrono::Utc::now().timestamp()).await?;
    info!(purged, "database ready");

    let identity: Option<Arc<dyn IdentityService>> = match &cfg.supabase {
        Some(sb) => Some(Arc::new(SupabaseClient::from_config(sb)?)),
        None => {
            info!("supabase not configured; identity mirroring disabled");
            None
        }
    };

    let rules = cfg.progression.rules();
    let bot = Bot::new(cfg.telegram.bot_token.clone());

    tokio::spawn(outbox::run_worker(
        pool.clone(),
        bot.clone(),
        Duration::from_millis(cfg.app.poll_interval_ms),
        cfg.app.max_backoff_seconds as i64,
    ));

    let state = AppState {
        pool: pool.clone(),
        rules: rules.clone(),
        auth: AuthSettings {
            bot_token: cfg.telegram.bot_token.clone(),
            init_data_max_age_secs: cfg.telegram.init_data_max_age_seconds,
            session_ttl_secs: cfg.http.session_ttl_seconds,
            connect_code_ttl_secs: cfg.telegram.connect_code_ttl_seconds,
        },
        identity,
        admin_token: cfg.admin_token().map(str::to_string),
    };
    let addr: SocketAddr = format!("{}:{}", cfg.http.host, cfg.http.port)
        .parse()
        .context("invalid http.host/http.port")?;
    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        tracing::warn!(?err, "failed to register bot commands");
    }

    let bot_state = Arc::new(BotState { pool, rules });
    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handlers::answer);

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![bot_state])
        .enable_ctrlc_handler()
        .build();

    info!("starting telegram bot");
    // Both stop on Ctrl+C.
    let ((), served) = futures::future::join(dispatcher.dispatch(), http::serve(state, addr)).await;
    served
}
