//! relaypoolctl — minimal demo CLI driving the relaypool core.
//!
//! This binary contains no business logic of its own: it parses
//! configuration, opens a `Pool`, sends one request (or reads prompts from
//! stdin, one per line, as a batch), prints the result(s) as JSON, and
//! closes the pool on shutdown. It exists only so the library can be
//! exercised end-to-end.

use clap::Parser;
use relaypool::{Args, Pool, RequestParams};
use std::io::{IsTerminal, Read};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("relaypool={},info", args.log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time = option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        "relaypoolctl starting"
    );

    let config = match args.into_pool_config() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(workers = config.workers.len(), "opening pool");
    let pool = Pool::open(config).await?;

    let mut stdin_text = String::new();
    if !std::io::stdin().is_terminal() {
        std::io::stdin().read_to_string(&mut stdin_text)?;
    }

    let prompts: Vec<String> = stdin_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
    };

    let work = async {
        if prompts.is_empty() {
            let output = match pool.process_request("Hello, world!", RequestParams::default()).await {
                Ok(success) => serde_json::json!({ "success": true, "result": success }),
                Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            let outcomes = pool
                .process_batch(&prompts, RequestParams::default(), None, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        println!("{}", serde_json::to_string_pretty(&pool.get_metrics()?)?);
        Ok::<(), anyhow::Error>(())
    };

    tokio::select! {
        result = work => { result?; }
        _ = shutdown => { info!("received shutdown signal"); }
    }

    pool.close().await;
    Ok(())
}
