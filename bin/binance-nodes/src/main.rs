use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{
    decode_item, run_batch, ApiSource, Config, FailurePolicy, HttpTransport, ItemOutcome, OrderInput,
    OrderIntent, TradingMode,
};
use engine::{
    ping, CustomEndpoint, IndicatorClient, IndicatorParameters, KlineFetcher, KlineQuery, OrderPlacer, OrderRoute, ReqwestTransport,
    TickerFetcher, TickerQuery,
};
use markdown::{MarkdownOptions, Rendered};
use paper::PaperTransport;

/// Binance order placement, market data and Markdown conversion over JSON items.
///
/// Items are read as a JSON array (or a single object) from `--input` or stdin.
/// Results are written to stdout as a JSON array, one entry per output item.
#[derive(Debug, Parser)]
#[command(name = "binance-nodes", version)]
struct Cli {
    /// JSON items file. Reads stdin when omitted.
    #[arg(long, short = 'i', global = true)]
    input: Option<PathBuf>,

    /// Record failed items in the output instead of aborting.
    #[arg(long, global = true)]
    continue_on_fail: bool,

    /// Last price for paper fills, as SYMBOL=PRICE. Repeatable.
    #[arg(long = "paper-price", global = true, value_parser = parse_price)]
    paper_prices: Vec<(String, f64)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Place orders (plain, OCO bracket or OTOCO).
    Order {
        /// proxy, direct or custom.
        #[arg(long, default_value = "proxy")]
        api_source: ApiSource,
        /// Base URL for the custom source.
        #[arg(long)]
        custom_url: Option<String>,
        #[arg(long, default_value = engine::order::DEFAULT_CUSTOM_ORDER_PATH)]
        custom_order_path: String,
        #[arg(long, default_value = engine::order::DEFAULT_CUSTOM_OCO_PATH)]
        custom_oco_path: String,
        #[arg(long, default_value = engine::order::DEFAULT_CUSTOM_OTOCO_PATH)]
        custom_otoco_path: String,
    },
    /// Fetch klines, mark-price klines or open interest.
    Klines,
    /// Fetch simple prices or 24h statistics.
    Ticker,
    /// Send market-data items to the analysis API for RSI, MACD, SMA and EMA.
    Indicators {
        #[arg(long, default_value = engine::indicators::DEFAULT_ANALYZE_URL)]
        api_url: String,
        #[arg(long, default_value_t = 14)]
        rsi_period: u32,
        #[arg(long, default_value_t = 12)]
        macd_fast: u32,
        #[arg(long, default_value_t = 26)]
        macd_slow: u32,
        #[arg(long, default_value_t = 9)]
        macd_signal: u32,
        #[arg(long)]
        no_sma: bool,
        #[arg(long)]
        no_ema: bool,
    },
    /// Convert items to Markdown.
    Markdown {
        /// TOML options file.
        #[arg(long)]
        options: Option<PathBuf>,
        /// Directory for files produced in binary output mode.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Check that the configured Binance base URL answers.
    Ping,
}

fn parse_price(raw: &str) -> Result<(String, f64), String> {
    let (symbol, price) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=PRICE, got '{raw}'"))?;
    let price = price
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid price '{price}': {e}"))?;
    Ok((common::normalize_symbol(symbol), price))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(mode = %cfg.trading_mode, "binance-nodes starting");

    // ── Transport (injected based on TRADING_MODE) ────────────────────────────
    let transport: Arc<dyn HttpTransport> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live mode: using ReqwestTransport");
            Arc::new(ReqwestTransport::new()?)
        }
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper mode: using PaperTransport");
            let paper = PaperTransport::new(cfg.paper_slippage_bps);
            for (symbol, price) in &cli.paper_prices {
                paper.update_price(symbol, *price).await;
            }
            Arc::new(paper)
        }
    };

    let policy = if cli.continue_on_fail {
        FailurePolicy::ContinueOnFail
    } else {
        FailurePolicy::StopOnError
    };

    let outcomes = match cli.command {
        Command::Ping => {
            let body = ping(transport.as_ref(), &cfg).await?;
            info!("Ping succeeded");
            vec![ItemOutcome::Ok(body)]
        }
        Command::Order {
            api_source,
            custom_url,
            custom_order_path,
            custom_oco_path,
            custom_otoco_path,
        } => {
            let custom = custom_url.map(|base_url| CustomEndpoint {
                base_url,
                order_path: custom_order_path,
                oco_path: custom_oco_path,
                otoco_path: custom_otoco_path,
            });
            let route = OrderRoute::from_config(api_source, &cfg, custom.as_ref())?;
            let placer = OrderPlacer::new(transport, route);
            let items = read_items(cli.input.as_deref())?;

            run_batch(items, policy, |_, item| {
                let placer = &placer;
                async move {
                    let input: OrderInput = decode_item(item)?;
                    let intent = OrderIntent::try_from(input)?;
                    placer.place(&intent).await?.into_items()
                }
            })
            .await?
        }
        Command::Klines => {
            let fetcher = KlineFetcher::new(transport, cfg.clone());
            let items = read_items(cli.input.as_deref())?;

            run_batch(items, policy, |_, item| {
                let fetcher = &fetcher;
                async move {
                    let query: KlineQuery = decode_item(item)?;
                    to_values(fetcher.fetch(&query).await?)
                }
            })
            .await?
        }
        Command::Ticker => {
            let fetcher = TickerFetcher::new(transport);
            let items = read_items(cli.input.as_deref())?;

            run_batch(items, policy, |_, item| {
                let fetcher = &fetcher;
                let api_key = &cfg.api_key;
                async move {
                    let mut query: TickerQuery = decode_item(item)?;
                    if query.api_key.is_empty() {
                        query.api_key = api_key.clone();
                    }
                    to_values(fetcher.fetch(&query).await?)
                }
            })
            .await?
        }
        Command::Indicators {
            api_url,
            rsi_period,
            macd_fast,
            macd_slow,
            macd_signal,
            no_sma,
            no_ema,
        } => {
            let parameters = IndicatorParameters {
                rsi_period,
                macd_fast,
                macd_slow,
                macd_signal,
                sma_enabled: !no_sma,
                ema_enabled: !no_ema,
            };
            parameters.validate()?;
            // The analysis API is not an exchange, so paper mode does not apply.
            let client = IndicatorClient::new(Arc::new(ReqwestTransport::new()?), api_url, parameters);
            let items = read_items(cli.input.as_deref())?;

            run_batch(items, policy, |_, item| {
                let client = &client;
                async move { Ok::<_, common::Error>(vec![client.analyze(item).await?]) }
            })
            .await?
        }
        Command::Markdown { options, out_dir } => {
            let options = match options {
                Some(path) => MarkdownOptions::load(path)?,
                None => MarkdownOptions::default(),
            };
            let items = read_items(cli.input.as_deref())?;

            run_batch(items, policy, |_, item| {
                let options = &options;
                let out_dir = &out_dir;
                async move { convert_item(item, options, out_dir) }
            })
            .await?
        }
    };

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    info!(outputs = outcomes.len(), failed, "Done");
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

/// A JSON array of items, or one bare object. Items stay raw so each one is
/// decoded (and may fail) inside the batch.
fn read_items(input: Option<&Path>) -> anyhow::Result<Vec<Value>> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read items from '{}'", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read items from stdin")?;
            buf
        }
    };
    if raw.trim().is_empty() {
        bail!("No input items");
    }

    let value: Value = serde_json::from_str(&raw).context("Input is not valid JSON")?;
    Ok(match value {
        Value::Array(items) => items,
        single => vec![single],
    })
}

/// Render one item and place it; binary mode writes the file under `out_dir`.
fn convert_item(item: Value, options: &MarkdownOptions, out_dir: &Path) -> common::Result<Vec<Value>> {
    let rendered = markdown::render(&item, options);
    match markdown::attach(item, rendered, &options.output) {
        Rendered::Item(value) => Ok(vec![value]),
        Rendered::File { item, file_name, contents } => {
            let path = out_dir.join(&file_name);
            std::fs::write(&path, contents)?;
            info!(path = %path.display(), "Markdown written");
            Ok(vec![item])
        }
    }
}

fn to_values<T: serde::Serialize>(reports: Vec<T>) -> common::Result<Vec<Value>> {
    reports
        .into_iter()
        .map(|r| serde_json::to_value(r).map_err(Into::into))
        .collect()
}
