//! The Binance USDT-margined perpetual adapter.
//!
//! Owns the REST clients, the dispatch queue, the private stream, and the
//! periodic account refresh; implements [`PerpVenue`](crate::PerpVenue).
//!
//! # Bootstrap sequence
//!
//! markets → tickers → private stream → position mode → account snapshot →
//! tick loop → open orders, aborting cleanly between steps once disposed.
//! The tick loop refreshes balance and positions in a single account call;
//! errors (bootstrap and tick alike) are emitted on the event bus and the
//! previous store state stays in place.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use keel_core::error::AdapterError;
use keel_core::events::EventEmitter;
use keel_core::store::{STABLE_ASSETS, Store};
use keel_core::types::{
    Balance, BalanceAsset, Candle, Order, OrderSide, OrderStatus, Position, PositionSide,
    SimpleIntent, SplitIntent, UpdateIntent,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::PerpVenue;
use crate::catalog;
use crate::config::BinanceConfig;
use crate::format::OrderFormatter;
use crate::json_util::{f64_field, f64_value, str_field, u64_field};
use crate::payload::{PayloadOrder, order_kind_from_venue};
use crate::queue::DispatchQueue;
use crate::rest::FuturesRest;
use crate::user_stream::UserStream;

/// Cancel requests are chunked like placements.
const CANCEL_CHUNK: usize = 5;

/// Binance USDT-margined perpetual futures adapter.
pub struct BinanceUsdm {
    config: BinanceConfig,
    store: Arc<Store>,
    events: EventEmitter,
    /// Paced instance for catalog, tickers, account, and listen-key traffic.
    rest: Arc<FuturesRest>,
    /// Unpaced instance backing the dispatch queue and cancellations.
    trade_rest: Arc<FuturesRest>,
    queue: DispatchQueue,
    user_stream: Option<UserStream>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    disposed: Arc<AtomicBool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl BinanceUsdm {
    /// Create the adapter. No connections are opened until `start`.
    pub fn new(config: BinanceConfig, store: Arc<Store>, events: EventEmitter) -> Self {
        let rest = Arc::new(FuturesRest::new(&config, true));
        let trade_rest = Arc::new(FuturesRest::new(&config, false));
        let queue = DispatchQueue::new(
            Arc::clone(&trade_rest) as Arc<dyn crate::queue::BatchSubmit>,
            events.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            store,
            events,
            rest,
            trade_rest,
            queue,
            user_stream: None,
            shutdown_tx,
            shutdown_rx,
            disposed: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    async fn bootstrap(&mut self) -> Result<()> {
        self.load_markets().await?;
        if self.is_disposed() {
            return Ok(());
        }

        self.load_tickers().await?;
        if self.is_disposed() {
            return Ok(());
        }

        let mut stream = UserStream::new(
            Arc::clone(&self.rest),
            Arc::clone(&self.store),
            self.events.clone(),
            self.config.effective_ws_url(),
            self.config.listen_key_refresh_secs,
        );
        stream.connect().await.context("private stream connect failed")?;
        self.user_stream = Some(stream);
        if self.is_disposed() {
            return Ok(());
        }

        let hedged = self.rest.get_position_mode().await?;
        self.store.set_hedged(hedged);
        if self.is_disposed() {
            return Ok(());
        }

        // Initial account snapshot so balance and positions are populated
        // before the refresh loop takes over.
        let account = self.rest.get_account().await?;
        apply_account_snapshot(&self.store, &account)?;
        if self.is_disposed() {
            return Ok(());
        }

        self.spawn_tick_loop();

        self.load_open_orders().await?;

        info!(
            "[binance-usdm] started — {} markets, hedged={hedged}",
            self.store.markets().len(),
        );
        Ok(())
    }

    async fn load_markets(&self) -> Result<()> {
        let info = self.rest.get_exchange_info().await?;
        let brackets = self.rest.get_leverage_brackets().await?;
        let markets = catalog::build_markets(&info, &brackets);
        let count = markets.len();
        self.store.set_markets(markets);
        self.events.info(format!("loaded {count} markets"));
        Ok(())
    }

    async fn load_tickers(&self) -> Result<()> {
        let t24 = self.rest.get_tickers_24h().await?;
        let book = self.rest.get_tickers_book().await?;
        let premium = self.rest.get_premium_index().await?;
        let tickers = catalog::build_tickers(&self.store.markets(), &t24, &book, &premium);
        let count = tickers.len();
        self.store.set_tickers(tickers);
        self.events.info(format!("loaded {count} tickers"));
        Ok(())
    }

    async fn load_open_orders(&self) -> Result<()> {
        let raw = self.rest.get_open_orders(None).await?;
        let orders: Vec<Order> = raw
            .as_array()
            .map(|arr| arr.iter().filter_map(parse_rest_order).collect())
            .unwrap_or_default();
        let count = orders.len();
        self.store.set_orders(orders);
        self.events.info(format!("loaded {count} open orders"));
        Ok(())
    }

    /// Periodic balance/position refresh.
    fn spawn_tick_loop(&mut self) {
        let rest = Arc::clone(&self.rest);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let tick = Duration::from_millis(self.config.tick_interval_ms);
        let mut shutdown_rx = self.shutdown_rx.clone();

        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(tick) => {}
                    _ = shutdown_rx.changed() => return,
                }

                match rest.get_account().await {
                    Ok(account) => {
                        if let Err(e) = apply_account_snapshot(&store, &account) {
                            events.error(format!("account refresh failed: {e:#}"));
                        }
                    }
                    Err(e) => events.error(format!("account refresh failed: {e:#}")),
                }
            }
        }));
    }

    /// Enqueue payloads and await the dispatch outcome.
    async fn submit_and_collect(&self, payloads: Vec<PayloadOrder>) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        self.queue.enqueue(payloads).await;
        self.queue.wait_idle().await;
        Ok(self.queue.drain_results())
    }
}

#[async_trait]
impl PerpVenue for BinanceUsdm {
    async fn start(&mut self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.bootstrap()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                error!("[binance-usdm] bootstrap failed: {e:#}");
                self.events.error(format!("bootstrap failed: {e:#}"));
                Ok(false)
            }
            Err(_) => {
                warn!("[binance-usdm] bootstrap timed out");
                Ok(false)
            }
        }
    }

    async fn place_orders(&self, intents: Vec<SimpleIntent>) -> Result<Vec<String>> {
        let mut payloads = Vec::new();
        {
            let formatter = OrderFormatter::new(&self.store, &self.events);
            for intent in &intents {
                payloads.extend(formatter.format(intent)?);
            }
        }
        self.submit_and_collect(payloads).await
    }

    async fn place_split_order(&self, intent: SplitIntent) -> Result<Vec<String>> {
        let payloads = OrderFormatter::new(&self.store, &self.events).format_split(&intent)?;
        self.submit_and_collect(payloads).await
    }

    async fn update_orders(&self, updates: Vec<UpdateIntent>) -> Result<Vec<String>> {
        let mut intents = Vec::with_capacity(updates.len());
        for update in &updates {
            let order = &update.order;
            if let Err(e) = self.trade_rest.cancel_order(&order.symbol, &order.id).await {
                self.events
                    .error(format!("cancel {} failed: {e:#}", order.id));
                continue;
            }
            self.store.remove_order(&order.id);

            intents.push(SimpleIntent {
                symbol: order.symbol.clone(),
                kind: order.kind,
                side: order.side,
                price: update
                    .price
                    .or((order.price != 0.0).then_some(order.price)),
                amount: update.amount.unwrap_or(order.remaining),
                time_in_force: None,
                reduce_only: order.reduce_only,
                stop_loss: None,
                take_profit: None,
            });
        }
        self.place_orders(intents).await
    }

    async fn cancel_orders(&self, symbol: &str, client_ids: &[String]) -> Result<()> {
        for chunk in client_ids.chunks(CANCEL_CHUNK) {
            let result = if chunk.len() == 1 {
                self.trade_rest.cancel_order(symbol, &chunk[0]).await
            } else {
                self.trade_rest.cancel_batch(symbol, chunk).await
            };
            match result {
                Ok(_) => {
                    for id in chunk {
                        self.store.remove_order(id);
                    }
                }
                Err(e) => self.events.error(format!("cancel failed: {e:#}")),
            }
        }
        Ok(())
    }

    async fn cancel_symbol_orders(&self, symbol: &str) -> Result<()> {
        self.trade_rest.cancel_symbol_orders(symbol).await?;
        for order in self.store.orders() {
            if order.symbol == symbol {
                self.store.remove_order(&order.id);
            }
        }
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let market = self
            .store
            .market(symbol)
            .ok_or_else(|| AdapterError::MarketNotFound(symbol.to_string()))?;
        let clamped = leverage.clamp(market.limits.leverage.min, market.limits.leverage.max);

        self.rest.set_leverage(symbol, clamped).await?;
        info!("[binance-usdm] leverage set: {symbol} → {clamped}x");
        Ok(())
    }

    async fn set_position_mode(&self, hedged: bool) -> Result<()> {
        // The venue refuses the switch with open positions; fail soft.
        let open = self.store.positions().iter().any(|p| p.contracts > 0.0);
        if open {
            self.events
                .error("cannot change position mode with open positions");
            return Ok(());
        }

        self.rest.set_position_mode(hedged).await?;
        self.store.set_hedged(hedged);
        info!("[binance-usdm] position mode set: hedged={hedged}");
        Ok(())
    }

    async fn fetch_ohlcv(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let raw = self.rest.get_klines(symbol, interval, limit).await?;
        Ok(raw
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_candle).collect())
            .unwrap_or_default())
    }

    async fn dispose(&mut self) -> Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(mut stream) = self.user_stream.take() {
            stream.dispose().await;
        }

        info!("[binance-usdm] disposed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON → typed helpers
// ---------------------------------------------------------------------------

/// Fold one `/fapi/v2/account` response into balance + positions.
///
/// Builds both projections fully before touching the store, so a conversion
/// failure leaves the previous (stale but consistent) state in place.
fn apply_account_snapshot(store: &Store, account: &Value) -> Result<()> {
    let mut assets = Vec::new();
    if let Some(slots) = account.get("assets").and_then(|a| a.as_array()) {
        for slot in slots {
            let Some(symbol) = str_field(slot, "asset") else {
                continue;
            };
            let wallet = f64_field(slot, "walletBalance").unwrap_or(0.0);
            if wallet == 0.0 {
                continue;
            }
            let usd_value = if STABLE_ASSETS.contains(&symbol) {
                wallet
            } else {
                let pair = format!("{symbol}USDT");
                let ticker = store
                    .ticker(&pair)
                    .ok_or(AdapterError::TickerNotFound(pair))?;
                wallet * ticker.last
            };
            assets.push(BalanceAsset {
                symbol: symbol.to_string(),
                wallet_balance: wallet,
                usd_value,
            });
        }
    }

    let balance = Balance {
        total: assets.iter().map(|a| a.usd_value).sum(),
        free: f64_field(account, "availableBalance").unwrap_or(0.0),
        used: f64_field(account, "totalInitialMargin").unwrap_or(0.0),
        upnl: f64_field(account, "totalUnrealizedProfit").unwrap_or(0.0),
        assets,
    };

    let mut positions = Vec::new();
    if let Some(slots) = account.get("positions").and_then(|p| p.as_array()) {
        for slot in slots {
            let Some(symbol) = str_field(slot, "symbol") else {
                continue;
            };
            // Positions for symbols outside the catalog are dropped.
            if store.market(symbol).is_none() {
                continue;
            }
            if let Some(position) = parse_position_slot(slot, symbol) {
                positions.push(position);
            }
        }
    }

    store.set_balance(balance);
    store.set_positions(positions);
    Ok(())
}

fn parse_position_slot(slot: &Value, symbol: &str) -> Option<Position> {
    let amount = f64_field(slot, "positionAmt")?;
    let side = match str_field(slot, "positionSide") {
        Some("LONG") => PositionSide::Long,
        Some("SHORT") => PositionSide::Short,
        _ => {
            if amount >= 0.0 {
                PositionSide::Long
            } else {
                PositionSide::Short
            }
        }
    };
    let entry_price = f64_field(slot, "entryPrice").unwrap_or(0.0);
    let upnl = f64_field(slot, "unrealizedProfit").unwrap_or(0.0);
    let contracts = amount.abs();

    Some(Position {
        symbol: symbol.to_string(),
        side,
        entry_price,
        contracts,
        notional: (contracts * entry_price + upnl).abs(),
        leverage: u64_field(slot, "leverage").unwrap_or(1) as u32,
        unrealized_pnl: upnl,
        // Not present in the account payload; folded in from ACCOUNT_UPDATE
        // and position-risk queries when available.
        liquidation_price: f64_field(slot, "liquidationPrice").unwrap_or(0.0),
    })
}

/// Parse one `/fapi/v1/openOrders` entry into a store order.
fn parse_rest_order(v: &Value) -> Option<Order> {
    let client_id = str_field(v, "clientOrderId")?;
    let symbol = str_field(v, "symbol")?;
    let kind = order_kind_from_venue(str_field(v, "origType").or_else(|| str_field(v, "type"))?)?;
    let side = match str_field(v, "side")? {
        "BUY" => OrderSide::Buy,
        _ => OrderSide::Sell,
    };
    let price = f64_field(v, "price")
        .filter(|p| *p != 0.0)
        .or_else(|| f64_field(v, "stopPrice"))
        .unwrap_or(0.0);
    let amount = f64_field(v, "origQty").unwrap_or(0.0);
    let filled = f64_field(v, "executedQty").unwrap_or(0.0);

    Some(Order {
        id: client_id.to_string(),
        order_id: u64_field(v, "orderId").unwrap_or(0),
        status: OrderStatus::Open,
        symbol: symbol.to_string(),
        kind,
        side,
        price,
        amount,
        filled,
        remaining: (amount - filled).max(0.0),
        reduce_only: v.get("reduceOnly").and_then(|r| r.as_bool()).unwrap_or(false),
    })
}

fn parse_candle(row: &Value) -> Option<Candle> {
    let row = row.as_array()?;
    Some(Candle {
        timestamp: row.first()?.as_u64()?,
        open: f64_value(row.get(1)?)?,
        high: f64_value(row.get(2)?)?,
        low: f64_value(row.get(3)?)?,
        close: f64_value(row.get(4)?)?,
        volume: f64_value(row.get(5)?)?,
    })
}
