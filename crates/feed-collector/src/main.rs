//! 선물 시장 데이터 수집기 CLI.

use clap::{Parser, Subcommand};
use feed_collector::{
    config::CollectorConfig,
    error::{CollectorError, Result},
    health::{print_error_report, run_health_check},
    historical::{streams_for, BackfillWindow, HistoricalCollector},
    streaming::{StreamingCollector, StreamingConfig},
};
use feed_core::{ErrorTracker, LogConfig, Symbol, Timeframe};
use feed_data::{connect_storage, DataError, RedisCache, StorageDriver};
use feed_exchange::{
    BinanceFuturesClient, BreakerRegistry, ExchangeError, FuturesApi, FuturesMarketStream,
    WsStreamKind,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "feed-collector")]
#[command(about = "Crypto futures market data collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 저장소 스키마 초기화
    Init,

    /// 과거 데이터 백필 (모든 스트림 병렬)
    CollectHistorical {
        /// 특정 심볼만 수집 (쉼표 구분, 예: "SOL/USDT,BTC/USDT")
        #[arg(long)]
        symbols: Option<String>,

        /// 수집 일수 (기본: COLLECTION_HISTORICAL_DAYS)
        #[arg(long)]
        days: Option<i64>,
    },

    /// WebSocket 실시간 수집 (Ctrl-C로 종료)
    StreamRealtime,

    /// 시스템 헬스 체크
    HealthCheck {
        /// 한 번만 실행 (기본)
        #[arg(long)]
        once: bool,

        /// 지정한 주기(초)로 계속 실행
        #[arg(long)]
        continuous: Option<u64>,
    },

    /// 에러 추적기/회로 차단기 상태 출력
    MonitorErrors {
        /// 한 번만 실행 (기본)
        #[arg(long)]
        once: bool,

        /// 요약을 JSON 파일로 내보내기
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// 데몬 모드: 주기적으로 증분 백필 실행
    Daemon {
        /// 실행 주기 (분, 기본: DAEMON_INTERVAL_MINUTES)
        #[arg(long)]
        interval_minutes: Option<u64>,
    },
}

/// 시작 시 한 번 구성되어 주입되는 공유 구성요소.
struct AppContext {
    config: CollectorConfig,
    storage: Arc<dyn StorageDriver>,
    cache: Option<RedisCache>,
    api: Arc<dyn FuturesApi>,
    tracker: Arc<ErrorTracker>,
    breakers: Arc<BreakerRegistry>,
}

async fn build_context(config: CollectorConfig) -> Result<AppContext> {
    let storage = connect_storage(&config.storage).await?;

    let cache = match &config.cache {
        Some(cache_config) => match RedisCache::connect(cache_config).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "캐시 연결 실패, 캐시 없이 계속");
                None
            }
        },
        None => None,
    };

    let tracker = Arc::new(ErrorTracker::with_defaults());
    let breakers = Arc::new(BreakerRegistry::new(config.resilience.breaker.clone()));

    let client = BinanceFuturesClient::new(
        config.exchange.clone(),
        config.resilience.retry.clone(),
        Arc::clone(&breakers),
        Arc::clone(&tracker),
    )?;
    let api: Arc<dyn FuturesApi> = Arc::new(client);

    Ok(AppContext {
        config,
        storage,
        cache,
        api,
        tracker,
        breakers,
    })
}

/// 설정 또는 CLI 인자에서 수집 심볼을 결정합니다.
fn resolve_symbols(ctx: &AppContext, override_list: &Option<String>) -> Vec<Symbol> {
    match override_list {
        Some(list) => list
            .split(',')
            .map(|s| Symbol::parse(s.trim()))
            .collect(),
        None => ctx.config.collection.symbols.clone(),
    }
}

async fn run_backfill(ctx: &AppContext, symbols: &[Symbol], window: BackfillWindow) -> Result<()> {
    let collector = HistoricalCollector::new(
        Arc::clone(&ctx.api),
        Arc::clone(&ctx.storage),
        Arc::clone(&ctx.tracker),
    )
    .with_order_book_depth(ctx.config.collection.order_book_depth);

    let streams = streams_for(
        &ctx.config.collection.timeframes,
        &ctx.config.collection.oi_periods,
        ctx.config.collection.collect_order_book,
    );

    for symbol in symbols {
        let stats = tokio::select! {
            stats = collector.collect_all_concurrent(symbol, window, streams.clone()) => stats,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("종료 신호 수신, 백필 중단");
                return Err(CollectorError::Cancelled);
            }
        };
        stats.log_summary(&format!("{} 백필", symbol));
    }

    Ok(())
}

async fn run_stream_realtime(ctx: &AppContext) -> Result<()> {
    let symbols = ctx.config.collection.symbols.clone();
    let stream_tf = ctx
        .config
        .collection
        .timeframes
        .first()
        .copied()
        .unwrap_or(Timeframe::M5);

    let kinds = vec![
        WsStreamKind::Kline(stream_tf),
        WsStreamKind::MarkPrice,
        WsStreamKind::ForceOrder,
    ];
    feed_exchange::ws::validate_subscription(&symbols, &kinds)?;

    let stream = FuturesMarketStream::new(ctx.config.exchange.ws_base_url(), &symbols, &kinds);
    let (events, ws_stop, ws_handle) = stream.spawn();

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let collector = StreamingCollector::new(
        Arc::clone(&ctx.storage),
        ctx.cache.clone(),
        Arc::clone(&ctx.tracker),
        StreamingConfig {
            batch_size: ctx.config.collection.ws_batch_size,
            flush_interval: ctx.config.collection.ws_batch_interval(),
            ..Default::default()
        },
    );

    let run_fut = collector.run(events, stop_rx);
    tokio::pin!(run_fut);

    tokio::select! {
        result = &mut run_fut => {
            let stats = result?;
            tracing::info!(events = stats.events, rows = stats.rows_written, "스트림이 종료됨");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("종료 신호 수신, 마지막 배치 플러시 중");
            let _ = ws_stop.send(true);
            let _ = stop_tx.send(true);

            let stats = (&mut run_fut).await?;
            let _ = ws_handle.await;
            tracing::info!(
                events = stats.events,
                flushes = stats.flushes,
                rows = stats.rows_written,
                "실시간 수집 종료"
            );
        }
    }

    Ok(())
}

async fn run_once_health(ctx: &AppContext) -> Result<()> {
    let symbol = ctx
        .config
        .collection
        .symbols
        .first()
        .cloned()
        .ok_or_else(|| CollectorError::Config("no symbols configured".to_string()))?;
    let timeframe = ctx
        .config
        .collection
        .timeframes
        .first()
        .copied()
        .unwrap_or(Timeframe::M5);

    let report = run_health_check(
        &ctx.storage,
        ctx.cache.as_ref(),
        &ctx.api,
        &symbol,
        timeframe,
    )
    .await;
    report.print();

    if !report.database {
        return Err(CollectorError::Storage(DataError::Connection(
            "database health check failed".to_string(),
        )));
    }
    if !report.exchange {
        return Err(CollectorError::Exchange(ExchangeError::Network(
            "exchange unreachable".to_string(),
        )));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = CollectorConfig::from_env()?;
    let ctx = build_context(config).await?;

    match cli.command {
        Commands::Init => {
            ctx.storage.init().await?;
            let info = ctx.storage.info().await?;
            println!("storage initialized: backend={}", info.backend);
        }

        Commands::CollectHistorical { symbols, days } => {
            ctx.storage.init().await?;
            let symbols = resolve_symbols(&ctx, &symbols);
            let days = days.unwrap_or(ctx.config.collection.historical_days);
            let window = BackfillWindow::last_days(days);

            tracing::info!(
                symbols = symbols.len(),
                days = days,
                "과거 데이터 수집 시작"
            );
            run_backfill(&ctx, &symbols, window).await?;
        }

        Commands::StreamRealtime => {
            ctx.storage.init().await?;
            run_stream_realtime(&ctx).await?;
        }

        Commands::HealthCheck { once: _, continuous } => match continuous {
            Some(interval_secs) => loop {
                let symbol = ctx
                    .config
                    .collection
                    .symbols
                    .first()
                    .cloned()
                    .ok_or_else(|| CollectorError::Config("no symbols configured".to_string()))?;
                let timeframe = ctx
                    .config
                    .collection
                    .timeframes
                    .first()
                    .copied()
                    .unwrap_or(Timeframe::M5);

                let report = run_health_check(
                    &ctx.storage,
                    ctx.cache.as_ref(),
                    &ctx.api,
                    &symbol,
                    timeframe,
                )
                .await;
                report.print();

                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(interval_secs)) => {}
                }
            },
            None => run_once_health(&ctx).await?,
        },

        Commands::MonitorErrors { once: _, export } => {
            print_error_report(&ctx.tracker, &ctx.breakers);
            if let Some(path) = export {
                ctx.tracker
                    .export(&path)
                    .map_err(|e| CollectorError::Task(format!("export failed: {}", e)))?;
                println!("error summary exported to {}", path.display());
            }
        }

        Commands::Daemon { interval_minutes } => {
            ctx.storage.init().await?;
            let interval_minutes =
                interval_minutes.unwrap_or(ctx.config.daemon.interval_minutes);
            let incremental_hours = ctx.config.daemon.incremental_hours;
            let symbols = ctx.config.collection.symbols.clone();

            tracing::info!(interval_minutes = interval_minutes, "데몬 모드 시작");

            // 시작 시 즉시 한 번 실행
            if let Err(e) =
                run_backfill(&ctx, &symbols, BackfillWindow::last_hours(incremental_hours)).await
            {
                if matches!(e, CollectorError::Cancelled) {
                    return Ok(());
                }
                tracing::error!(error = %e, "증분 수집 실패");
            }

            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                interval_minutes * 60,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // 첫 tick은 즉시 발생하므로 건너뜀
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("종료 신호 수신, 데몬 종료");
                        break;
                    }
                    _ = interval.tick() => {
                        let window = BackfillWindow::last_hours(incremental_hours);
                        match run_backfill(&ctx, &symbols, window).await {
                            Ok(()) => {}
                            Err(CollectorError::Cancelled) => break,
                            Err(e) => tracing::error!(error = %e, "증분 수집 실패"),
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    feed_core::init_logging(&LogConfig::new(cli.log_level.clone()));

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "수집기 실패");
        std::process::exit(e.exit_code());
    }
}
