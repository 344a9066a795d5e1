//! Backtest command

use anyhow::{Context, Result};
use tracing::info;

use hybrid_maker::backtest::HybridBacktester;
use hybrid_maker::oms::ManagerConfig;
use hybrid_maker::report::SessionReporter;
use hybrid_maker::{data, Config, Symbol};

pub fn run(
    config_path: String,
    data_path: String,
    symbol: String,
    capital: Option<f64>,
) -> Result<()> {
    let config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)?
    } else {
        info!(config = %config_path, "Config file not found; using defaults");
        Config::default()
    };

    let policy = config.policy_for(&symbol);
    let manager_config = ManagerConfig::from_execution(&config.execution, &symbol);
    let initial_capital = capital.unwrap_or(config.backtest.initial_capital);

    let bars = data::load_bars_csv(&data_path)?;
    if bars.is_empty() {
        anyhow::bail!("No usable bars in {}", data_path);
    }
    info!(
        symbol = %symbol,
        bars = bars.len(),
        from = %bars[0].timestamp,
        to = %bars[bars.len() - 1].timestamp,
        "Data loaded"
    );

    let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let reporter = SessionReporter::new(&config.backtest.results_dir, &session_id, &symbol)
        .context("Failed to create session reporter")?;

    let mut backtester = HybridBacktester::new(
        Symbol::new(symbol),
        policy,
        manager_config,
        initial_capital,
    )?
    .with_reporter(reporter);

    let report = backtester.run(&bars)?;

    println!();
    println!("{}", "=".repeat(70));
    println!("HYBRID STRATEGY BACKTEST REPORT");
    println!("{}", "=".repeat(70));
    println!();
    println!("Symbol:           {}", report.symbol);
    println!("Bars processed:   {}", report.bars_processed);
    println!("Initial capital:  ${:>12.2}", report.initial_capital);
    println!("Final equity:     ${:>12.2}", report.final_equity);
    println!("Total return:     {:>12.2}%", report.total_return_pct);
    println!();
    println!("Orders placed:    {}", report.orders_placed);
    println!("Orders cancelled: {}", report.orders_cancelled);
    println!("Fills:            {}", report.total_fills);
    println!("Closing trades:   {}", report.closing_trades);
    println!("Win rate:         {:.2}%", report.win_rate_pct);
    println!("Realized PnL:     ${:.2}", report.cumulative_pnl);
    println!("Fees paid:        ${:.2}", report.total_fees);
    println!();
    println!("State distribution:");
    for (state, count) in &report.state_distribution {
        let pct = *count as f64 / report.bars_processed.max(1) as f64 * 100.0;
        println!("  {:<10} {:>8} bars ({:.1}%)", state, count, pct);
    }
    println!("{}", "=".repeat(70));

    Ok(())
}
