//! Leveraged position engine simulation.
//!
//! Runs the position lifecycle against in-memory collaborators: open and close
//! round trips, a liquidation sweep, a manual close racing the sweeper, live
//! marks, the periodic sweeper task, and a store snapshot.
//!
//! Usage: `leverage-sim [config.toml]`

use anyhow::{Context, Result};
use leverage_core::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct World {
    engine: Arc<PositionEngine>,
    ledger: Arc<InMemoryLedger>,
    store: Arc<InMemoryPositionStore>,
    feed: Arc<InMemoryPriceSource>,
}

impl World {
    fn new(config: &AppConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(InMemoryPositionStore::new());
        let feed = Arc::new(InMemoryPriceSource::with_reference_prices());
        let engine = Arc::new(PositionEngine::new(
            config.engine.clone(),
            ledger.clone(),
            store.clone(),
        ));
        Self {
            engine,
            ledger,
            store,
            feed,
        }
    }

    fn trader(&self, balance: rust_decimal::Decimal) -> UserId {
        let user = UserId::new();
        self.ledger.open_account(user, Quote::new(balance));
        user
    }

    fn sweeper(&self, config: &AppConfig) -> LiquidationSweeper {
        LiquidationSweeper::new(self.engine.clone(), self.feed.clone(), config.sweeper.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => AppConfig::default(),
    };
    config.logging.init();

    println!("Leveraged Position Engine Simulation");
    println!(
        "Max leverage {}x, security margin {}, sweep every {}s\n",
        config.engine.max_leverage, config.engine.security_margin, config.sweeper.interval_secs
    );

    scenario_1_round_trip(&config).await?;
    scenario_2_liquidation_sweep(&config).await?;
    scenario_3_close_vs_sweeper(&config).await?;
    scenario_4_marks(&config).await?;
    scenario_5_periodic_sweeper(&config).await?;
    scenario_6_snapshot(&config).await?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// Open and close at a profit and at a loss.
async fn scenario_1_round_trip(config: &AppConfig) -> Result<()> {
    println!("Scenario 1: Open / Close Round Trip\n");

    let world = World::new(config);
    let alice = world.trader(dec!(10000));

    let long = world
        .engine
        .open(alice, "BTC/USD", Side::Long, dec!(1000), 10, dec!(100))
        .await?;
    println!(
        "  Alice opens {} {} @ {} with {} margin, liquidation at {}",
        long.leverage, long.side, long.entry_price, long.amount, long.liquidation_price
    );
    println!("  Balance after open: {}", world.ledger.balance(alice).await?);

    let closed = world.engine.close_position(alice, long.id, dec!(110)).await?;
    println!(
        "  Closed @ 110, profit {}, balance {}",
        closed.profit.unwrap_or_else(Quote::zero),
        world.ledger.balance(alice).await?
    );

    let short = world
        .engine
        .open(alice, "ETH/USD", Side::Short, dec!(1000), 10, dec!(100))
        .await?;
    let closed = world.engine.close_position(alice, short.id, dec!(105)).await?;
    println!(
        "  Short closed @ 105, profit {}, balance {}",
        closed.profit.unwrap_or_else(Quote::zero),
        world.ledger.balance(alice).await?
    );

    let summary = world.engine.trade_summary(alice).await?;
    println!(
        "  {} closed, {} winning ({}%), realized {}\n",
        summary.closed_trades,
        summary.winning_trades,
        summary.success_rate_pct.round_dp(2),
        summary.total_realized_pnl
    );

    Ok(())
}

/// Price crash sweeps breached longs and leaves the rest.
async fn scenario_2_liquidation_sweep(config: &AppConfig) -> Result<()> {
    println!("Scenario 2: Liquidation Sweep\n");

    let world = World::new(config);
    let sweeper = world.sweeper(config);
    let bob = world.trader(dec!(50000));

    for leverage in [2, 5, 10, 20] {
        let pos = world
            .engine
            .open(bob, "SOL/USD", Side::Long, dec!(1000), leverage, dec!(150))
            .await?;
        println!("  {} long, liquidation at {}", pos.leverage, pos.liquidation_price);
    }

    let crash = Price::new(dec!(130)).context("positive price")?;
    world.feed.set_price("SOL/USD", crash);
    println!("\n  SOL drops to {}", crash);

    let report = sweeper.run_cycle().await;
    println!(
        "  Evaluated {}, liquidated {}",
        report.evaluated,
        report.liquidated.len()
    );
    println!(
        "  Still open: {}, balance {}\n",
        world.engine.open_positions(bob).await?.len(),
        world.ledger.balance(bob).await?
    );

    Ok(())
}

/// Manual close and sweeper racing for the same breached position.
async fn scenario_3_close_vs_sweeper(config: &AppConfig) -> Result<()> {
    println!("Scenario 3: Manual Close vs Sweeper\n");

    let world = World::new(config);
    let sweeper = world.sweeper(config);
    let carol = world.trader(dec!(5000));

    let pos = world
        .engine
        .open(carol, "AVAX/USD", Side::Short, dec!(1000), 5, dec!(35))
        .await?;
    let spike = Price::new(dec!(42)).context("positive price")?;
    world.feed.set_price("AVAX/USD", spike);
    println!("  Short @ 35 liquidates at {}, price spikes to {}", pos.liquidation_price, spike);

    let engine = world.engine.clone();
    let manual = tokio::spawn(async move { engine.close_position(carol, pos.id, dec!(42)).await });
    let report = sweeper.run_cycle().await;
    let manual = manual.await?;

    match manual {
        Ok(p) => println!("  Manual close won, profit {}", p.profit.unwrap_or_else(Quote::zero)),
        Err(e) if e.is_benign() => println!("  Manual close lost: {e}"),
        Err(e) => return Err(e.into()),
    }
    println!(
        "  Sweeper liquidated {}, lost {}",
        report.liquidated.len(),
        report.lost_races.len()
    );
    println!("  Balance {}\n", world.ledger.balance(carol).await?);

    Ok(())
}

/// Dashboard view: unrealized pnl and distance to liquidation.
async fn scenario_4_marks(config: &AppConfig) -> Result<()> {
    println!("Scenario 4: Position Marks\n");

    let world = World::new(config);
    let dave = world.trader(dec!(20000));

    for (symbol, reference) in SUPPORTED_SYMBOLS.iter().take(4) {
        world
            .engine
            .open(dave, symbol, Side::Long, dec!(1000), 15, *reference)
            .await?;
    }

    // ETH drifts toward its liquidation price
    world
        .feed
        .set_ticker("ETH/USD", Ticker::new(Price::new(dec!(3300)).context("positive price")?, dec!(-5.7)));

    for mark in world.engine.position_marks(dave, world.feed.as_ref()).await? {
        println!(
            "  {:<9} pnl {:>10} distance {:>8}% {}",
            mark.position.symbol,
            mark.unrealized_pnl.map(|q| q.value().round_dp(2).to_string()).unwrap_or_default(),
            mark.liquidation_distance_pct
                .map(|d| d.round_dp(2).to_string())
                .unwrap_or_default(),
            if mark.high_risk { "HIGH RISK" } else { "" }
        );
    }
    println!();

    Ok(())
}

/// The sweeper as a background task with a start/stop lifecycle.
async fn scenario_5_periodic_sweeper(config: &AppConfig) -> Result<()> {
    println!("Scenario 5: Periodic Sweeper\n");

    let world = World::new(config);
    let erin = world.trader(dec!(3000));
    world
        .engine
        .open(erin, "DOGE/USD", Side::Long, dec!(1000), 20, dec!(0.15))
        .await?;

    let fast = AppConfig {
        sweeper: SweeperConfig {
            interval_secs: 1,
            ..config.sweeper.clone()
        },
        ..config.clone()
    };
    let handle = world.sweeper(&fast).spawn();

    world.feed.set_price("DOGE/USD", Price::new(dec!(0.14)).context("positive price")?);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    handle.stop().await;

    println!(
        "  After one tick: {} open, {} closed\n",
        world.engine.open_positions(erin).await?.len(),
        world.engine.closed_positions(erin).await?.len()
    );

    Ok(())
}

/// Positions survive a restart through a JSON snapshot.
async fn scenario_6_snapshot(config: &AppConfig) -> Result<()> {
    println!("Scenario 6: Store Snapshot\n");

    let world = World::new(config);
    let frank = world.trader(dec!(5000));
    world
        .engine
        .open(frank, "BNB/USD", Side::Short, dec!(500), 3, dec!(600))
        .await?;

    let path = std::env::temp_dir().join(format!("leverage-sim-{}.json", UserId::new()));
    world.store.save_snapshot(&path)?;
    let restored = InMemoryPositionStore::load_snapshot(&path)?;
    std::fs::remove_file(&path).ok();

    println!(
        "  Saved {} position(s), restored {} open for frank",
        world.store.len(),
        restored.list_open(frank).await?.len()
    );

    Ok(())
}
