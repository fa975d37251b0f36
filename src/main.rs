//! LSM Engine CLI
//!
//! Prices a Bermudan callable, putable or game bond under the Gaussian
//! short-rate engine and reports the price, exercise statistics and
//! optionally the exposure profile.
//!
//! `LSM_PATHS` and `LSM_SEED` override the corresponding flags.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::time::Instant;

use lsm_engine::dates::{add_years, periodic_dates};
use lsm_engine::instrument::{load_schedule, AnalyticPayoff, PolynomialBasis, StateFactor};
use lsm_engine::lsm::ValuationDiagnostics;
use lsm_engine::{
    CashflowStream, Currency, ExerciseEvaluator, ExerciseSchedule, GaussianShortRateEngine, Instrument, LsmConfig,
    LsmEngine, MarketEnvironment, YieldCurve,
};

/// Which exercise rights the bond carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Style {
    Callable,
    Putable,
    Game,
    Bullet,
}

#[derive(Debug, Parser)]
#[command(name = "lsm_engine", version, about = "Least-squares Monte Carlo bond pricer")]
struct Args {
    /// Valuation date
    #[arg(long, default_value = "2025-01-01")]
    as_of: NaiveDate,

    /// Number of simulated paths
    #[arg(long, default_value_t = 4096)]
    paths: usize,

    /// Random seed
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Flat continuously-compounded zero rate
    #[arg(long, default_value_t = 0.03)]
    rate: f64,

    /// Short-rate volatility
    #[arg(long, default_value_t = 0.01)]
    vol: f64,

    /// Short-rate mean reversion
    #[arg(long, default_value_t = 0.05)]
    mean_reversion: f64,

    /// Annual coupon amount
    #[arg(long, default_value_t = 5.0)]
    coupon: f64,

    /// Face value
    #[arg(long, default_value_t = 100.0)]
    face: f64,

    /// Years to maturity
    #[arg(long, default_value_t = 5)]
    years: u32,

    /// Exercise rights
    #[arg(long, value_enum, default_value_t = Style::Callable)]
    style: Style,

    /// Call redemption amount
    #[arg(long, default_value_t = 100.0)]
    call_price: f64,

    /// Put redemption amount
    #[arg(long, default_value_t = 100.0)]
    put_price: f64,

    /// Notional scaling of the reported price
    #[arg(long, default_value_t = 1.0)]
    notional: f64,

    /// Polynomial degree of the short-rate basis
    #[arg(long, default_value_t = 2)]
    degree: usize,

    /// Months between exposure report dates (0 disables exposures)
    #[arg(long, default_value_t = 0)]
    report_months: u32,

    /// Engine configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Underlying schedule CSV replacing the generated bullet bond
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Exposure grid CSV output
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print a JSON summary instead of text
    #[arg(long)]
    json: bool,
}

/// Summary printed with `--json`
#[derive(Debug, Serialize)]
struct Summary {
    price: f64,
    standard_error: f64,
    exercise_probability: f64,
    diagnostics: ValuationDiagnostics,
    expected_exposure: Option<Vec<(NaiveDate, f64)>>,
    elapsed_ms: u128,
}

fn redemption(dates: Vec<NaiveDate>, amount: f64) -> ExerciseEvaluator {
    ExerciseEvaluator::AnalyticFormula {
        schedule: ExerciseSchedule::flat(dates, 0.0, true),
        payoff: AnalyticPayoff::Redemption { amount },
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = Args::parse();
    if let Some(paths) = env::var("LSM_PATHS").ok().and_then(|s| s.parse().ok()) {
        args.paths = paths;
    }
    if let Some(seed) = env::var("LSM_SEED").ok().and_then(|s| s.parse().ok()) {
        args.seed = seed;
    }

    let start = Instant::now();
    let as_of = args.as_of;
    let maturity = add_years(as_of, args.years);

    let config = match &args.config {
        Some(path) => LsmConfig::from_json_path(path)
            .with_context(|| format!("failed to load engine config from {}", path.display()))?,
        None => LsmConfig::default(),
    };

    let underlying = match &args.schedule {
        Some(path) => load_schedule(path, Currency::USD, None)
            .with_context(|| format!("failed to load schedule from {}", path.display()))?,
        None => CashflowStream::fixed_rate_bond(Currency::USD, as_of, maturity, 12, args.coupon, args.face)
            .context("failed to build bullet bond")?,
    };
    let last_pay = underlying.last_pay_date().unwrap_or(maturity);

    // Annual exercise dates from year one, excluding the final pay date
    let exercise_dates: Vec<NaiveDate> = periodic_dates(as_of, last_pay, 12)
        .into_iter()
        .filter(|d| *d < last_pay)
        .collect();

    let mut instrument = Instrument::new(args.notional, underlying);
    if matches!(args.style, Style::Callable | Style::Game) {
        instrument = instrument.with_call(redemption(exercise_dates.clone(), args.call_price));
    }
    if matches!(args.style, Style::Putable | Style::Game) {
        instrument = instrument.with_put(redemption(exercise_dates.clone(), args.put_price));
    }

    let market = MarketEnvironment::new(as_of).with_discount_curve(YieldCurve::flat(
        "USD-OIS",
        Currency::USD,
        as_of,
        args.rate,
    ));

    let mut grid = periodic_dates(as_of, last_pay, 3);
    grid.extend(exercise_dates.iter().copied());
    grid.push(last_pay);
    let simulation = GaussianShortRateEngine::new(as_of, grid, args.paths, args.seed, args.mean_reversion, args.vol)
        .context("failed to build simulation engine")?;

    let report_dates = if args.report_months > 0 {
        let mut dates = vec![as_of];
        dates.extend(periodic_dates(as_of, last_pay, args.report_months));
        dates
    } else {
        Vec::new()
    };

    let basis = PolynomialBasis::new(StateFactor::ShortRate { currency: Currency::USD }, args.degree);
    let engine = LsmEngine::new(config);
    let valuation = engine
        .calculate(&instrument, &market, &simulation, Currency::USD, Some(&basis), &report_dates)
        .context("valuation failed")?;

    if let (Some(path), Some(grid)) = (&args.output, &valuation.exposures) {
        grid.write_csv_path(path)
            .with_context(|| format!("failed to write exposures to {}", path.display()))?;
    }

    let expected_exposure = valuation.exposures.as_ref().map(|grid| {
        grid.report_dates
            .iter()
            .copied()
            .zip(grid.expected_exposure())
            .collect::<Vec<_>>()
    });

    let summary = Summary {
        price: valuation.price,
        standard_error: valuation.standard_error(args.notional),
        exercise_probability: valuation.exercise_probability(),
        diagnostics: valuation.diagnostics.clone(),
        expected_exposure,
        elapsed_ms: start.elapsed().as_millis(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary).context("failed to serialise summary")?);
        return Ok(());
    }

    println!("LSM Engine v{}", env!("CARGO_PKG_VERSION"));
    println!("======================\n");
    println!("Instrument: {:?} bond, maturity {}", args.style, last_pay);
    println!("  Paths: {}", summary.diagnostics.paths);
    println!("  Partition dates: {}", summary.diagnostics.partition_len);
    println!();
    println!("Price:                {:>14.6}", summary.price);
    println!("Standard error:       {:>14.6}", summary.standard_error);
    println!("Exercise probability: {:>14.4}", summary.exercise_probability);
    println!(
        "  Calls: {}, Puts: {}",
        summary.diagnostics.call_exercises, summary.diagnostics.put_exercises
    );
    println!(
        "  Regression dates: {} ({} rank deficient, {} stabilisation rounds)",
        summary.diagnostics.regression_dates,
        summary.diagnostics.rank_deficient_dates,
        summary.diagnostics.stabilization_rounds
    );

    if let Some(profile) = &summary.expected_exposure {
        println!();
        println!("{:>12} {:>14}", "Date", "EE");
        println!("{}", "-".repeat(27));
        for (date, ee) in profile {
            println!("{:>12} {:>14.6}", date, ee);
        }
    }
    if let Some(path) = &args.output {
        println!("\nExposures written to {}", path.display());
    }

    println!("\nCompleted in {:?}", start.elapsed());
    Ok(())
}
