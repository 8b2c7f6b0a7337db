//! SQLite-backed repository for one symbol's engine state
//!
//! The engine is the source of truth while running; the repository holds the
//! durable copy and is rewritten with single-row upserts after every mutating
//! decision. Open/reset/close/delete are idempotent.

use crate::core::{Phase, Side, StoreError, TicketInfo, TouchFlags};
use crate::grid::GridPair;
use crate::persistence::schema::SCHEMA;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The single `symbol_state` row
#[derive(Debug, Clone, PartialEq)]
pub struct StateRow {
    pub phase: Phase,
    pub center_price: f64,
    pub iteration: u32,
    pub current_group: u32,
    pub anchor_price: f64,
    pub graceful_stop: bool,
    pub metadata_json: String,
}

/// One append-only trade history row
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub ts: i64,
    pub event_type: String,
    pub pair_index: i32,
    pub direction: String,
    pub price: f64,
    pub lot: f64,
    pub ticket: u64,
    pub notes: String,
}

impl HistoryEvent {
    pub fn now(
        event_type: &str,
        pair_index: i32,
        direction: &str,
        price: f64,
        lot: f64,
        ticket: u64,
        notes: String,
    ) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            ts,
            event_type: event_type.to_string(),
            pair_index,
            direction: direction.to_string(),
            price,
            lot,
            ticket,
            notes,
        }
    }
}

/// Handle to one symbol's registry database
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    symbol: String,
    path: PathBuf,
}

impl Repository {
    /// Open (creating if missing) and ensure the schema exists
    pub async fn open<P: AsRef<Path>>(path: P, symbol: &str) -> Result<Self, StoreError> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!(symbol, path = %path.as_ref().display(), "repository open");
        Ok(Self {
            pool,
            symbol: symbol.to_string(),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Registry file path for a symbol under a data directory
    pub fn path_for(data_dir: &Path, symbol: &str) -> PathBuf {
        let safe: String = symbol
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        data_dir.join(format!("rung_{safe}.db"))
    }

    /// Delete a registry file; missing files are fine
    pub fn delete_file(path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }

    // --- symbol_state -----------------------------------------------------

    pub async fn save_state(&self, state: &StateRow) -> Result<(), StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        sqlx::query(
            r#"
            INSERT INTO symbol_state
                (symbol, phase, center_price, iteration, current_group,
                 anchor_price, graceful_stop, last_update_time, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                phase = excluded.phase,
                center_price = excluded.center_price,
                iteration = excluded.iteration,
                current_group = excluded.current_group,
                anchor_price = excluded.anchor_price,
                graceful_stop = excluded.graceful_stop,
                last_update_time = excluded.last_update_time,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&self.symbol)
        .bind(state.phase.as_str())
        .bind(state.center_price)
        .bind(state.iteration as i64)
        .bind(state.current_group as i64)
        .bind(state.anchor_price)
        .bind(state.graceful_stop as i64)
        .bind(now)
        .bind(&state.metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_state(&self) -> Result<Option<StateRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM symbol_state WHERE symbol = ?")
            .bind(&self.symbol)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(StateRow {
            phase: Phase::parse(row.try_get::<String, _>("phase")?.as_str()),
            center_price: row.try_get("center_price")?,
            iteration: row.try_get::<i64, _>("iteration")? as u32,
            current_group: row.try_get::<i64, _>("current_group")? as u32,
            anchor_price: row.try_get("anchor_price")?,
            graceful_stop: row.try_get::<i64, _>("graceful_stop")? != 0,
            metadata_json: row.try_get("metadata_json")?,
        }))
    }

    // --- grid_pairs -------------------------------------------------------

    pub async fn upsert_pair(&self, pair: &GridPair) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO grid_pairs (
                symbol, pair_index, buy_price, sell_price,
                buy_ticket, sell_ticket, buy_filled, sell_filled,
                buy_pending_ticket, sell_pending_ticket,
                trade_count, next_action, buy_in_zone, sell_in_zone,
                locked_buy_entry, locked_sell_entry, tp_blocked, group_id,
                hedge_ticket, hedge_active, hedge_direction
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, pair_index) DO UPDATE SET
                buy_price = excluded.buy_price,
                sell_price = excluded.sell_price,
                buy_ticket = excluded.buy_ticket,
                sell_ticket = excluded.sell_ticket,
                buy_filled = excluded.buy_filled,
                sell_filled = excluded.sell_filled,
                buy_pending_ticket = excluded.buy_pending_ticket,
                sell_pending_ticket = excluded.sell_pending_ticket,
                trade_count = excluded.trade_count,
                next_action = excluded.next_action,
                buy_in_zone = excluded.buy_in_zone,
                sell_in_zone = excluded.sell_in_zone,
                locked_buy_entry = excluded.locked_buy_entry,
                locked_sell_entry = excluded.locked_sell_entry,
                tp_blocked = excluded.tp_blocked,
                group_id = excluded.group_id,
                hedge_ticket = excluded.hedge_ticket,
                hedge_active = excluded.hedge_active,
                hedge_direction = excluded.hedge_direction
            "#,
        )
        .bind(&self.symbol)
        .bind(pair.index)
        .bind(pair.buy_price)
        .bind(pair.sell_price)
        .bind(pair.buy_ticket as i64)
        .bind(pair.sell_ticket as i64)
        .bind(pair.buy_filled as i64)
        .bind(pair.sell_filled as i64)
        .bind(pair.buy_pending_ticket as i64)
        .bind(pair.sell_pending_ticket as i64)
        .bind(pair.trade_count as i64)
        .bind(pair.next_action.as_str())
        .bind(pair.buy_in_zone as i64)
        .bind(pair.sell_in_zone as i64)
        .bind(pair.locked_buy_entry)
        .bind(pair.locked_sell_entry)
        .bind(pair.tp_blocked as i64)
        .bind(pair.group_id as i64)
        .bind(pair.hedge_ticket as i64)
        .bind(pair.hedge_active as i64)
        .bind(pair.hedge_direction.map(|d| d.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_pairs(&self) -> Result<Vec<GridPair>, StoreError> {
        let rows = sqlx::query("SELECT * FROM grid_pairs WHERE symbol = ? ORDER BY pair_index")
            .bind(&self.symbol)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut pair = GridPair::new(
                row.try_get::<i64, _>("pair_index")? as i32,
                row.try_get("buy_price")?,
                row.try_get("sell_price")?,
                row.try_get::<i64, _>("group_id")? as u32,
            );
            pair.buy_ticket = row.try_get::<i64, _>("buy_ticket")? as u64;
            pair.sell_ticket = row.try_get::<i64, _>("sell_ticket")? as u64;
            pair.buy_filled = row.try_get::<i64, _>("buy_filled")? != 0;
            pair.sell_filled = row.try_get::<i64, _>("sell_filled")? != 0;
            pair.buy_pending_ticket = row.try_get::<i64, _>("buy_pending_ticket")? as u64;
            pair.sell_pending_ticket = row.try_get::<i64, _>("sell_pending_ticket")? as u64;
            pair.trade_count = row.try_get::<i64, _>("trade_count")? as u32;
            pair.next_action = Side::from(row.try_get::<String, _>("next_action")?.as_str());
            pair.buy_in_zone = row.try_get::<i64, _>("buy_in_zone")? != 0;
            pair.sell_in_zone = row.try_get::<i64, _>("sell_in_zone")? != 0;
            pair.locked_buy_entry = row.try_get("locked_buy_entry")?;
            pair.locked_sell_entry = row.try_get("locked_sell_entry")?;
            pair.tp_blocked = row.try_get::<i64, _>("tp_blocked")? != 0;
            pair.hedge_ticket = row.try_get::<i64, _>("hedge_ticket")? as u64;
            pair.hedge_active = row.try_get::<i64, _>("hedge_active")? != 0;
            pair.hedge_direction = row
                .try_get::<Option<String>, _>("hedge_direction")?
                .map(|s| Side::from(s.as_str()));
            out.push(pair);
        }
        Ok(out)
    }

    pub async fn delete_pair(&self, pair_index: i32) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM grid_pairs WHERE symbol = ? AND pair_index = ?")
            .bind(&self.symbol)
            .bind(pair_index)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- ticket_map -------------------------------------------------------

    pub async fn upsert_ticket(
        &self,
        ticket: u64,
        info: &TicketInfo,
        touch: &TouchFlags,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ticket_map
                (ticket, symbol, pair_index, leg, entry_price, tp_price, sl_price,
                 tp_touched, sl_touched)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticket) DO UPDATE SET
                pair_index = excluded.pair_index,
                leg = excluded.leg,
                entry_price = excluded.entry_price,
                tp_price = excluded.tp_price,
                sl_price = excluded.sl_price,
                tp_touched = excluded.tp_touched,
                sl_touched = excluded.sl_touched
            "#,
        )
        .bind(ticket as i64)
        .bind(&self.symbol)
        .bind(info.pair_index)
        .bind(info.leg.tag())
        .bind(info.entry)
        .bind(info.tp)
        .bind(info.sl)
        .bind(touch.tp_touched as i64)
        .bind(touch.sl_touched as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_ticket(&self, ticket: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ticket_map WHERE ticket = ?")
            .bind(ticket as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_tickets(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM ticket_map WHERE symbol = ?")
            .bind(&self.symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_tickets(&self) -> Result<Vec<(u64, TicketInfo, TouchFlags)>, StoreError> {
        let rows = sqlx::query("SELECT * FROM ticket_map WHERE symbol = ?")
            .bind(&self.symbol)
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let ticket = row.try_get::<i64, _>("ticket")? as u64;
            let info = TicketInfo {
                pair_index: row.try_get::<i64, _>("pair_index")? as i32,
                leg: Side::from(row.try_get::<String, _>("leg")?.as_str()),
                entry: row.try_get("entry_price")?,
                tp: row.try_get("tp_price")?,
                sl: row.try_get("sl_price")?,
            };
            let touch = TouchFlags {
                tp_touched: row.try_get::<i64, _>("tp_touched")? != 0,
                sl_touched: row.try_get::<i64, _>("sl_touched")? != 0,
            };
            out.push((ticket, info, touch));
        }
        Ok(out)
    }

    // --- trade_history ----------------------------------------------------

    pub async fn append_history(&self, event: &HistoryEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trade_history
                (symbol, ts, event_type, pair_index, direction, price, lot, ticket, notes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.symbol)
        .bind(event.ts)
        .bind(&event.event_type)
        .bind(event.pair_index)
        .bind(&event.direction)
        .bind(event.price)
        .bind(event.lot)
        .bind(event.ticket as i64)
        .bind(&event.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent history rows, newest first
    pub async fn load_history(&self, limit: u32) -> Result<Vec<HistoryEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT ts, event_type, pair_index, direction, price, lot, ticket, notes
             FROM trade_history WHERE symbol = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(&self.symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(HistoryEvent {
                ts: row.try_get("ts")?,
                event_type: row.try_get("event_type")?,
                pair_index: row.try_get::<i64, _>("pair_index")? as i32,
                direction: row.try_get("direction")?,
                price: row.try_get("price")?,
                lot: row.try_get("lot")?,
                ticket: row.try_get::<i64, _>("ticket")? as u64,
                notes: row.try_get("notes")?,
            });
        }
        Ok(out)
    }

    // --- lifecycle --------------------------------------------------------

    /// Remove every row for this symbol; the schema survives
    pub async fn reset(&self) -> Result<(), StoreError> {
        for table in ["symbol_state", "grid_pairs", "ticket_map", "trade_history"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE symbol = ?"))
                .bind(&self.symbol)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
