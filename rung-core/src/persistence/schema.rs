//! SQLite schema for the per-symbol registry

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS symbol_state (
    symbol            TEXT PRIMARY KEY,
    phase             TEXT NOT NULL,
    center_price      REAL NOT NULL DEFAULT 0,
    iteration         INTEGER NOT NULL DEFAULT 1,
    current_group     INTEGER NOT NULL DEFAULT 0,
    anchor_price      REAL NOT NULL DEFAULT 0,
    graceful_stop     INTEGER NOT NULL DEFAULT 0,
    last_update_time  INTEGER NOT NULL DEFAULT 0,
    metadata_json     TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS grid_pairs (
    symbol              TEXT NOT NULL,
    pair_index          INTEGER NOT NULL,
    buy_price           REAL NOT NULL,
    sell_price          REAL NOT NULL,
    buy_ticket          INTEGER NOT NULL DEFAULT 0,
    sell_ticket         INTEGER NOT NULL DEFAULT 0,
    buy_filled          INTEGER NOT NULL DEFAULT 0,
    sell_filled         INTEGER NOT NULL DEFAULT 0,
    buy_pending_ticket  INTEGER NOT NULL DEFAULT 0,
    sell_pending_ticket INTEGER NOT NULL DEFAULT 0,
    trade_count         INTEGER NOT NULL DEFAULT 0,
    next_action         TEXT NOT NULL DEFAULT 'buy',
    buy_in_zone         INTEGER NOT NULL DEFAULT 0,
    sell_in_zone        INTEGER NOT NULL DEFAULT 0,
    locked_buy_entry    REAL NOT NULL DEFAULT 0,
    locked_sell_entry   REAL NOT NULL DEFAULT 0,
    tp_blocked          INTEGER NOT NULL DEFAULT 0,
    group_id            INTEGER NOT NULL DEFAULT 0,
    hedge_ticket        INTEGER NOT NULL DEFAULT 0,
    hedge_active        INTEGER NOT NULL DEFAULT 0,
    hedge_direction     TEXT,
    PRIMARY KEY (symbol, pair_index)
);

CREATE TABLE IF NOT EXISTS ticket_map (
    ticket       INTEGER PRIMARY KEY,
    symbol       TEXT NOT NULL,
    pair_index   INTEGER NOT NULL,
    leg          TEXT NOT NULL,
    entry_price  REAL NOT NULL,
    tp_price     REAL NOT NULL,
    sl_price     REAL NOT NULL,
    tp_touched   INTEGER NOT NULL DEFAULT 0,
    sl_touched   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS trade_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol      TEXT NOT NULL,
    ts          INTEGER NOT NULL,
    event_type  TEXT NOT NULL,
    pair_index  INTEGER NOT NULL,
    direction   TEXT NOT NULL,
    price       REAL NOT NULL,
    lot         REAL NOT NULL,
    ticket      INTEGER NOT NULL DEFAULT 0,
    notes       TEXT NOT NULL DEFAULT ''
);
"#;
