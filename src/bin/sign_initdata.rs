use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tg_progress::config::Telegram as TelegramCfg;
use tg_progress::initdata::{self, WebAppUser};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Produce signed Web App init data for local testing"
)]
struct Args {
    /// Path to YAML config file (reads only `telegram`)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Bot token to sign with; overrides the config file
    #[arg(long, env = "BOT_TOKEN")]
    bot_token: Option<String>,

    #[arg(long, default_value_t = 1)]
    user_id: i64,

    #[arg(long, default_value = "Test")]
    first_name: String,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    language_code: Option<String>,

    /// Unix seconds; defaults to now
    #[arg(long)]
    auth_date: Option<i64>,

    #[arg(long)]
    start_param: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TelegramOnlyConfig {
    telegram: TelegramCfg,
}

fn bot_token(args: &Args) -> Result<String> {
    if let Some(token) = &args.bot_token {
        return Ok(token.clone());
    }
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let cfg: TelegramOnlyConfig = serde_yaml::from_str(&text).context("invalid config YAML")?;
    Ok(cfg.telegram.bot_token)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let token = bot_token(&args)?;

    let user = WebAppUser {
        id: args.user_id,
        first_name: args.first_name.clone(),
        last_name: None,
        username: args.username.clone(),
        language_code: args.language_code.clone(),
        is_premium: None,
    };
    let user_json = serde_json::to_string(&user)?;
    let auth_date = args
        .auth_date
        .unwrap_or_else(|| chrono::Utc::now().timestamp())
        .to_string();

    let mut pairs = vec![("auth_date", auth_date.as_str()), ("user", user_json.as_str())];
    if let Some(sp) = &args.start_param {
        pairs.push(("start_param", sp.as_str()));
    }
    println!("{}", initdata::encode_signed(&pairs, &token));
    Ok(())
}
