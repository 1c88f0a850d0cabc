//! glc: command wrapper around the ingestion pipeline.
//!
//! Exit statuses: 0 success, 1 bar-level validation failure, 2 network or
//! transient failure exhausted, 3 schema mismatch, 4 configuration error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use glc_config::{Config, OutputFormat};
use glc_core::bar::InstrumentType;
use glc_core::{Bar, DataError, SeriesKey, Timeframe};
use glc_db::{BarStore, ClickHouseStore};
use glc_fetch::{ArchiveFetcher, RestFetcher, SymbolRegistry};
use glc_files::{render_csv, write_atomic, FileMeta};
use glc_ingest::{MarketDataService, QueryRequest};
use glc_validate::{ReportStore, Validator};

#[derive(Parser)]
#[command(name = "glc", about = "Gap-free crypto OHLCV ingestion", version)]
struct Cli {
    /// YAML config files, merged in order (later overrides earlier).
    /// GLC_* environment variables override both.
    #[arg(long, global = true)]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the live database schema against the expected contract.
    SchemaCheck {
        /// Create the table first if it does not exist.
        #[arg(long)]
        create: bool,
    },
    /// Query a range, auto-ingesting and gap-filling as needed.
    Query {
        #[arg(long, value_delimiter = ',')]
        symbol: Vec<String>,
        #[arg(long)]
        timeframe: String,
        /// RFC 3339 instant or YYYY-MM-DD (midnight UTC). End is exclusive.
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "spot")]
        instrument: String,
        #[arg(long)]
        no_auto_ingest: bool,
        #[arg(long)]
        no_fill_gaps: bool,
    },
    /// Query a range and write it to the output directory atomically.
    Export {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "spot")]
        instrument: String,
    },
    /// Run the five-layer validator over an existing CSV file.
    Validate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "spot")]
        instrument: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Dev-time .env bootstrap; real deployments set the environment.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<(), DataError> {
    let config = if cli.config.is_empty() {
        glc_config::load_from_env()?
    } else {
        let paths: Vec<&Path> = cli.config.iter().map(PathBuf::as_path).collect();
        glc_config::load(&paths)?
    };
    info!(fingerprint = %config.fingerprint, "configuration loaded");
    let cfg = config.config;

    match cli.command {
        Command::SchemaCheck { create } => schema_check(&cfg, create).await,
        Command::Query {
            symbol,
            timeframe,
            start,
            end,
            instrument,
            no_auto_ingest,
            no_fill_gaps,
        } => {
            let req = build_request(symbol, &timeframe, &start, &end, &instrument)?
                .with_auto_ingest(!no_auto_ingest)
                .with_fill_gaps(!no_fill_gaps);
            let rows = service(&cfg).await?.query(&req).await?;
            info!(rows = rows.len(), "query complete");
            println!("{} rows", rows.len());
            Ok(())
        }
        Command::Export {
            symbol,
            timeframe,
            start,
            end,
            instrument,
        } => {
            let req = build_request(vec![symbol], &timeframe, &start, &end, &instrument)?;
            let rows = service(&cfg).await?.query(&req).await?;
            export(&cfg, &req, &rows)
        }
        Command::Validate {
            file,
            symbol,
            timeframe,
            start,
            end,
            instrument,
        } => {
            let req = build_request(vec![symbol], &timeframe, &start, &end, &instrument)?;
            validate_file(&cfg, &req, &file)
        }
    }
}

async fn schema_check(cfg: &Config, create: bool) -> Result<(), DataError> {
    let timeout = Duration::from_secs(cfg.http_timeout_seconds);
    if create {
        // Connect laxly, create, then re-validate strictly.
        let store = ClickHouseStore::connect(&cfg.db, timeout, false).await?;
        store.create_table().await?;
    }
    ClickHouseStore::connect(&cfg.db, timeout, true).await?;
    println!("schema OK");
    Ok(())
}

async fn service(cfg: &Config) -> Result<MarketDataService, DataError> {
    let timeout = Duration::from_secs(cfg.http_timeout_seconds);
    let store: Arc<dyn BarStore> =
        Arc::new(ClickHouseStore::connect(&cfg.db, timeout, cfg.strict_schema).await?);
    let archive = Arc::new(ArchiveFetcher::new(
        cfg.upstream.archive_root.clone(),
        timeout,
        cfg.max_retries,
    )?);
    let rest = Arc::new(RestFetcher::new(
        cfg.upstream.rest_spot_root.clone(),
        cfg.upstream.rest_futures_root.clone(),
        timeout,
        cfg.max_retries,
        cfg.chunk_size_spot,
        cfg.chunk_size_futures,
    )?);
    let registry = Arc::new(SymbolRegistry::new(&cfg.upstream.rest_spot_root, timeout)?);
    Ok(MarketDataService::new(
        store,
        archive,
        rest,
        registry,
        cfg.parallel_gap_workers,
    ))
}

fn build_request(
    symbols: Vec<String>,
    timeframe: &str,
    start: &str,
    end: &str,
    instrument: &str,
) -> Result<QueryRequest, DataError> {
    if symbols.is_empty() {
        return Err(DataError::Config("at least one --symbol is required".into()));
    }
    let tf = Timeframe::parse(timeframe)?;
    let req = QueryRequest::new(symbols[0].clone(), tf, parse_instant(start)?, parse_instant(end)?)
        .with_symbols(symbols)
        .with_instrument(InstrumentType::parse(instrument)?);
    Ok(req)
}

fn parse_instant(s: &str) -> Result<i64, DataError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).timestamp_micros());
    }
    if let Ok(d) = s.parse::<NaiveDate>() {
        let dt = d.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(dt.and_utc().timestamp_micros());
    }
    Err(DataError::Config(format!(
        "cannot parse instant '{s}': expected RFC 3339 or YYYY-MM-DD"
    )))
}

fn export(cfg: &Config, req: &QueryRequest, rows: &[Bar]) -> Result<(), DataError> {
    let series = SeriesKey::new(
        req.symbols[0].clone(),
        req.timeframe,
        req.instrument_type,
    );
    let meta = FileMeta {
        series: series.clone(),
        start_micros: req.start_micros,
        end_micros: req.end_micros,
        generated_at: Utc::now(),
    };

    std::fs::create_dir_all(&cfg.output_dir)
        .map_err(|e| DataError::Config(format!("create output dir: {e}")))?;
    let stem = format!(
        "{}-{}-{}-{}",
        series.symbol,
        series.timeframe,
        date_tag(req.start_micros),
        date_tag(req.end_micros),
    );

    let path = match cfg.output_format {
        OutputFormat::Csv => {
            let path = cfg.output_dir.join(format!("{stem}.csv"));
            write_atomic(&path, &render_csv(&meta, rows)?)?;
            path
        }
        OutputFormat::Parquet => {
            #[cfg(feature = "parquet")]
            {
                let path = cfg.output_dir.join(format!("{stem}.parquet"));
                glc_files::parquet_out::write_parquet(&path, &meta, rows)?;
                path
            }
            #[cfg(not(feature = "parquet"))]
            {
                return Err(DataError::Config(
                    "output_format=parquet but this binary was built without the parquet feature"
                        .into(),
                ));
            }
        }
    };
    info!(path = %path.display(), rows = rows.len(), "export written");

    // Post-export validation, persisted for historical queries.
    let report = Validator::default().validate_bars(rows, &series, req.start_micros, req.end_micros);
    let store = ReportStore::open(&cfg.output_dir.join("validation_reports.sqlite"))?;
    store.append(&report)?;
    if !report.passed() {
        return Err(DataError::MalformedInput(format!(
            "exported file failed validation (run {})",
            report.run_id
        )));
    }
    println!("{} rows -> {}", rows.len(), path.display());
    Ok(())
}

fn validate_file(cfg: &Config, req: &QueryRequest, file: &Path) -> Result<(), DataError> {
    let series = SeriesKey::new(
        req.symbols[0].clone(),
        req.timeframe,
        req.instrument_type,
    );
    let text = std::fs::read_to_string(file)
        .map_err(|e| DataError::Config(format!("read {}: {e}", file.display())))?;
    let report =
        Validator::default().validate_csv(&text, &series, req.start_micros, req.end_micros);

    std::fs::create_dir_all(&cfg.output_dir)
        .map_err(|e| DataError::Config(format!("create output dir: {e}")))?;
    let store = ReportStore::open(&cfg.output_dir.join("validation_reports.sqlite"))?;
    store.append(&report)?;

    for layer in &report.layers {
        println!(
            "{:<10} errors={} warnings={}",
            layer.name,
            layer.errors.len(),
            layer.warnings.len()
        );
        for e in &layer.errors {
            println!("  error: {e}");
        }
        for w in &layer.warnings {
            println!("  warn:  {w}");
        }
    }
    if report.passed() {
        println!("PASS ({} rows, run {})", report.total_rows, report.run_id);
        Ok(())
    } else {
        Err(DataError::MalformedInput(format!(
            "validation failed (run {})",
            report.run_id
        )))
    }
}

fn date_tag(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .expect("timestamp in range")
        .format("%Y%m%d")
        .to_string()
}
