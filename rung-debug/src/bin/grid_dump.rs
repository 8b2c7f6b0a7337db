//! Dump a symbol's persisted grid state as tables
//!
//! Reads the registry database directly (the engine does not need to be
//! running) and prints symbol state, pairs, tracked tickets and the recent
//! trade history.

use anyhow::{Context, Result};
use clap::Parser;
use rung_core::persistence::Repository;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Registry database file (e.g. data/rung_VIX75.db)
    db: std::path::PathBuf,

    /// Symbol stored in the registry
    #[arg(short, long)]
    symbol: String,

    /// History rows to print
    #[arg(long, default_value = "20")]
    history: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let repo = Repository::open(&args.db, &args.symbol)
        .await
        .context("opening registry")?;

    match repo.load_state().await? {
        Some(state) => {
            println!("symbol   : {}", args.symbol);
            println!("phase    : {}", state.phase);
            println!("group    : {}", state.current_group);
            println!("anchor   : {:.2}", state.anchor_price);
            println!("center   : {:.2}", state.center_price);
            println!("iteration: {}", state.iteration);
            println!("graceful : {}", state.graceful_stop);
        }
        None => {
            println!("no state stored for {}", args.symbol);
            return Ok(());
        }
    }

    println!();
    println!(
        "{:>6} {:>5} {:>10} {:>10} {:>4} {:>4} {:>6} {:>6} {:>10} {:>10} {:>7} {:>6}",
        "pair", "grp", "buy", "sell", "B?", "S?", "count", "next", "lockedB", "lockedS", "blocked",
        "hedge"
    );
    for pair in repo.load_pairs().await? {
        println!(
            "{:>6} {:>5} {:>10.2} {:>10.2} {:>4} {:>4} {:>6} {:>6} {:>10.2} {:>10.2} {:>7} {:>6}",
            pair.index,
            pair.group_id,
            pair.buy_price,
            pair.sell_price,
            if pair.buy_filled { "x" } else { "-" },
            if pair.sell_filled { "x" } else { "-" },
            pair.trade_count,
            pair.next_action.tag(),
            pair.locked_buy_entry,
            pair.locked_sell_entry,
            if pair.tp_blocked { "yes" } else { "no" },
            if pair.hedge_active { "yes" } else { "no" },
        );
    }

    println!();
    println!(
        "{:>12} {:>6} {:>4} {:>10} {:>10} {:>10} {:>4} {:>4}",
        "ticket", "pair", "leg", "entry", "tp", "sl", "tpT", "slT"
    );
    for (ticket, info, touch) in repo.load_tickets().await? {
        println!(
            "{:>12} {:>6} {:>4} {:>10.2} {:>10.2} {:>10.2} {:>4} {:>4}",
            ticket,
            info.pair_index,
            info.leg.tag(),
            info.entry,
            info.tp,
            info.sl,
            if touch.tp_touched { "x" } else { "-" },
            if touch.sl_touched { "x" } else { "-" },
        );
    }

    println!();
    println!(
        "{:>12} {:<12} {:>6} {:>4} {:>10} {:>6} {:>12}  notes",
        "ts", "event", "pair", "dir", "price", "lot", "ticket"
    );
    for event in repo.load_history(args.history).await? {
        println!(
            "{:>12} {:<12} {:>6} {:>4} {:>10.2} {:>6.2} {:>12}  {}",
            event.ts,
            event.event_type,
            event.pair_index,
            event.direction,
            event.price,
            event.lot,
            event.ticket,
            event.notes,
        );
    }

    repo.close().await;
    Ok(())
}
