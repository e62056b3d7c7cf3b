//! Private user-data stream.
//!
//! One background task owns the websocket: it folds `ACCOUNT_UPDATE` and
//! `ORDER_TRADE_UPDATE` events into the store, emits fills and raw position
//! updates on the event bus, renews the listen key on a fixed interval, and
//! measures stream latency with an application-level ping.
//!
//! # Ping protocol
//!
//! On socket open the task immediately sends
//! `{"id":42,"method":"LIST_SUBSCRIPTIONS"}` and records the send instant.
//! When the echo with `id == 42` arrives, half the round trip (rounded, in
//! milliseconds) lands in the store and a 10-second timer rearms the next
//! ping. Resetting the timer clears any in-flight rearm.
//!
//! Malformed or unrecognized messages are dropped without logging noise;
//! the venue interleaves event types this adapter does not consume.

use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use keel_core::events::{AdapterEvent, EventEmitter};
use keel_core::store::Store;
use keel_core::types::{FillRecord, Order, OrderSide, OrderStatus, PositionSide};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{Duration, Instant, interval, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::json_util::{f64_field, str_field, u64_field};
use crate::payload::order_kind_from_venue;
use crate::rest::FuturesRest;

/// Correlation ID of the application ping.
const PING_ID: u64 = 42;
/// Delay between a ping echo and the next ping.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// How one websocket session ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// The user-data stream: listen-key lifecycle plus the socket task.
pub struct UserStream {
    rest: Arc<FuturesRest>,
    store: Arc<Store>,
    events: EventEmitter,
    ws_base: String,
    refresh: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl UserStream {
    pub fn new(
        rest: Arc<FuturesRest>,
        store: Arc<Store>,
        events: EventEmitter,
        ws_base: String,
        refresh_secs: u64,
    ) -> Self {
        Self {
            rest,
            store,
            events,
            ws_base,
            refresh: Duration::from_secs(refresh_secs),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Acquire a listen key and start the stream task.
    pub async fn connect(&mut self) -> Result<()> {
        let listen_key = self.rest.create_listen_key().await?;
        let url = format!("{}/{}", self.ws_base.trim_end_matches('/'), listen_key);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rest = Arc::clone(&self.rest);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let refresh = self.refresh;

        self.task = Some(tokio::spawn(async move {
            stream_loop(rest, store, events, url, refresh, shutdown_rx).await;
        }));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Stop the task and release the listen key.
    pub async fn dispose(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        // Best-effort: the key also expires on its own.
        let _ = self.rest.close_listen_key().await;
    }
}

// ---------------------------------------------------------------------------
// Socket loop
// ---------------------------------------------------------------------------

/// Connect, run a session, reconnect with backoff until shutdown.
async fn stream_loop(
    rest: Arc<FuturesRest>,
    store: Arc<Store>,
    events: EventEmitter,
    url: String,
    refresh: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match connect_async(&url).await {
            Ok((ws, _)) => {
                info!("[user-stream] connected");
                backoff = Duration::from_secs(1);
                match session(ws, &rest, &store, &events, refresh, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => {
                        info!("[user-stream] shutdown requested");
                        return;
                    }
                    SessionEnd::Disconnected => {
                        warn!("[user-stream] disconnected, reconnecting in {backoff:?}");
                    }
                }
            }
            Err(e) => {
                error!("[user-stream] connect failed: {e}, retrying in {backoff:?}");
            }
        }

        tokio::select! {
            _ = sleep(backoff) => {},
            _ = shutdown_rx.changed() => return,
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}

/// One connected session: read events, keep the listen key alive, ping.
async fn session(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    rest: &FuturesRest,
    store: &Store,
    events: &EventEmitter,
    refresh: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = ws.split();

    // Ping immediately on open.
    let mut ping_sent_at = Some(Instant::now());
    if ws_write.send(ping_message()).await.is_err() {
        return SessionEnd::Disconnected;
    }

    let mut keepalive = interval(refresh);
    keepalive.tick().await; // skip the immediate first tick

    let ping_timer = sleep(PING_INTERVAL);
    tokio::pin!(ping_timer);
    let mut ping_armed = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = ws_write.close().await;
                return SessionEnd::Shutdown;
            }

            _ = keepalive.tick() => {
                if let Err(e) = rest.keepalive_listen_key().await {
                    warn!("[user-stream] listen key refresh failed: {e:#}");
                    events.error(format!("listen key refresh failed: {e:#}"));
                }
            }

            _ = &mut ping_timer, if ping_armed => {
                ping_armed = false;
                ping_sent_at = Some(Instant::now());
                if ws_write.send(ping_message()).await.is_err() {
                    return SessionEnd::Disconnected;
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        // Parse failures are silently dropped.
                        let Ok(v) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if v.get("id").and_then(|i| i.as_u64()) == Some(PING_ID) {
                            if let Some(sent) = ping_sent_at.take() {
                                store.set_latency(half_round_trip_ms(sent.elapsed()));
                            }
                            ping_timer.as_mut().reset(Instant::now() + PING_INTERVAL);
                            ping_armed = true;
                        } else {
                            apply_event(store, events, &v);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
                    Some(Err(e)) => {
                        error!("[user-stream] read error: {e}");
                        return SessionEnd::Disconnected;
                    }
                    _ => {} // Pong, Binary, Frame — ignore
                }
            }
        }
    }
}

/// The application ping frame.
fn ping_message() -> Message {
    Message::Text(
        serde_json::json!({"id": PING_ID, "method": "LIST_SUBSCRIPTIONS"})
            .to_string()
            .into(),
    )
}

/// Stream latency estimate: half the round trip, rounded to milliseconds.
fn half_round_trip_ms(round_trip: std::time::Duration) -> u64 {
    (round_trip.as_secs_f64() * 1000.0 / 2.0).round() as u64
}

// ---------------------------------------------------------------------------
// Event folding
// ---------------------------------------------------------------------------

/// Fold one decoded venue message into the store and event bus.
pub(crate) fn apply_event(store: &Store, events: &EventEmitter, v: &Value) {
    match v.get("e").and_then(|e| e.as_str()) {
        Some("ACCOUNT_UPDATE") => apply_account_update(store, events, v),
        Some("ORDER_TRADE_UPDATE") => apply_order_update(store, events, v),
        _ => {}
    }
}

fn apply_account_update(store: &Store, events: &EventEmitter, v: &Value) {
    events.emit(AdapterEvent::PositionUpdate(v.clone()));

    let Some(a) = v.get("a") else { return };

    if let Some(slots) = a.get("P").and_then(|p| p.as_array()) {
        for slot in slots {
            let Some(symbol) = str_field(slot, "s") else { continue };
            let Some(amount) = f64_field(slot, "pa") else { continue };
            let side = match str_field(slot, "ps") {
                Some("LONG") => PositionSide::Long,
                Some("SHORT") => PositionSide::Short,
                // One-way slots report BOTH; the amount's sign is the side.
                _ => {
                    if amount >= 0.0 {
                        PositionSide::Long
                    } else {
                        PositionSide::Short
                    }
                }
            };
            let entry_price = f64_field(slot, "ep").unwrap_or(0.0);
            let upnl = f64_field(slot, "up").unwrap_or(0.0);
            store.apply_position_slot(symbol, side, entry_price, amount, upnl);
        }
    }

    if let Some(slots) = a.get("B").and_then(|b| b.as_array()) {
        let mut touched = false;
        for slot in slots {
            let (Some(asset), Some(wallet)) = (str_field(slot, "a"), f64_field(slot, "wb"))
            else {
                continue;
            };
            store.apply_balance_slot(asset, wallet);
            touched = true;
        }
        if touched {
            store.recompute_balance_total();
        }
    }
}

fn apply_order_update(store: &Store, events: &EventEmitter, v: &Value) {
    let Some(o) = v.get("o") else { return };
    let Some(status) = str_field(o, "X") else { return };
    let Some(client_id) = str_field(o, "c") else { return };

    if matches!(status, "PARTIALLY_FILLED" | "FILLED") {
        if let Some(fill) = derive_fill(o, client_id) {
            events.emit(AdapterEvent::Fill(fill));
        }
    }

    match status {
        "NEW" => {
            if let Some(order) = parse_open_order(o, client_id) {
                store.upsert_order(order);
            }
        }
        "PARTIALLY_FILLED" => {
            if let Some(filled) = f64_field(o, "z") {
                store.update_order_fill(client_id, filled);
            }
        }
        "CANCELED" | "FILLED" | "EXPIRED" => store.remove_order(client_id),
        _ => {}
    }
}

/// Derive a fill record from an execution update.
fn derive_fill(o: &Value, client_id: &str) -> Option<FillRecord> {
    let symbol = str_field(o, "s")?;
    let side = match str_field(o, "S")? {
        "BUY" => OrderSide::Buy,
        _ => OrderSide::Sell,
    };
    let price = f64_field(o, "ap")?;
    let amount = f64_field(o, "l")?;

    Some(FillRecord {
        symbol: symbol.to_string(),
        order_id: client_id.to_string(),
        side,
        price,
        amount,
        notional: amount * price,
        realized_pnl: f64_field(o, "rp").unwrap_or(0.0),
        commission: f64_field(o, "n"),
        maker: o.get("m").and_then(|m| m.as_bool()).unwrap_or(false),
        reduce_only: o.get("R").and_then(|r| r.as_bool()).unwrap_or(false),
    })
}

/// Parse a `NEW` order update into an open order for the store.
fn parse_open_order(o: &Value, client_id: &str) -> Option<Order> {
    let symbol = str_field(o, "s")?;
    let side = match str_field(o, "S")? {
        "BUY" => OrderSide::Buy,
        _ => OrderSide::Sell,
    };
    let kind = order_kind_from_venue(str_field(o, "ot").or_else(|| str_field(o, "o"))?)?;
    // Limit orders carry `p`; trigger orders carry only `sp`.
    let price = f64_field(o, "p")
        .filter(|p| *p != 0.0)
        .or_else(|| f64_field(o, "sp"))
        .unwrap_or(0.0);
    let amount = f64_field(o, "q").unwrap_or(0.0);
    let filled = f64_field(o, "z").unwrap_or(0.0);

    Some(Order {
        id: client_id.to_string(),
        order_id: u64_field(o, "i").unwrap_or(0),
        status: OrderStatus::Open,
        symbol: symbol.to_string(),
        kind,
        side,
        price,
        amount,
        filled,
        remaining: (amount - filled).max(0.0),
        reduce_only: o.get("R").and_then(|r| r.as_bool()).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::types::{Balance, BalanceAsset, OrderKind, Position, Ticker};

    fn fixture() -> (Store, EventEmitter, keel_core::events::EventReceiver) {
        let store = Store::new();
        let (events, rx) = EventEmitter::channel();
        (store, events, rx)
    }

    fn json(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn ping_latency_is_half_round_trip() {
        assert_eq!(half_round_trip_ms(std::time::Duration::from_millis(80)), 40);
        assert_eq!(half_round_trip_ms(std::time::Duration::from_millis(81)), 41);
        assert_eq!(half_round_trip_ms(std::time::Duration::ZERO), 0);
    }

    #[test]
    fn new_order_is_upserted_with_stop_price_fallback() {
        let (store, events, _rx) = fixture();

        let v = json(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{
                "s":"BTCUSDT","c":"cid-1","i":900011,"S":"SELL","ot":"STOP_MARKET",
                "X":"NEW","p":"0","sp":"29000.0","q":"0.5","z":"0","R":true
            }}"#,
        );
        apply_event(&store, &events, &v);

        let order = store.order("cid-1").unwrap();
        assert_eq!(order.kind, OrderKind::StopLoss);
        assert_eq!(order.price, 29000.0);
        assert_eq!(order.order_id, 900011);
        assert_eq!(order.remaining, 0.5);
        assert!(order.reduce_only);
    }

    #[test]
    fn fill_event_derivation() {
        let (store, events, mut rx) = fixture();

        let v = json(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{
                "s":"ETHUSDT","c":"cid-2","i":900012,"S":"BUY","ot":"LIMIT",
                "X":"PARTIALLY_FILLED","ap":"2000.5","l":"0.4","z":"0.4","rp":"1.25",
                "n":"0.16","m":true,"R":false
            }}"#,
        );
        apply_event(&store, &events, &v);

        match rx.try_recv().unwrap() {
            AdapterEvent::Fill(fill) => {
                assert_eq!(fill.symbol, "ETHUSDT");
                assert_eq!(fill.side, OrderSide::Buy);
                assert_eq!(fill.price, 2000.5);
                assert_eq!(fill.amount, 0.4);
                assert!((fill.notional - 800.2).abs() < 1e-9);
                assert_eq!(fill.realized_pnl, 1.25);
                assert_eq!(fill.commission, Some(0.16));
                assert!(fill.maker);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fill_without_commission_field() {
        let (store, events, mut rx) = fixture();

        let v = json(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{
                "s":"ETHUSDT","c":"cid-3","i":1,"S":"SELL","ot":"MARKET",
                "X":"FILLED","ap":"2000","l":"1","z":"1","rp":"0","m":false,"R":false
            }}"#,
        );
        apply_event(&store, &events, &v);

        match rx.try_recv().unwrap() {
            AdapterEvent::Fill(fill) => assert_eq!(fill.commission, None),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn terminal_statuses_remove_the_order() {
        for status in ["CANCELED", "FILLED", "EXPIRED"] {
            let (store, events, _rx) = fixture();
            let new = json(
                r#"{"e":"ORDER_TRADE_UPDATE","o":{
                    "s":"BTCUSDT","c":"cid-4","i":1,"S":"BUY","ot":"LIMIT",
                    "X":"NEW","p":"30000","q":"1","z":"0","R":false
                }}"#,
            );
            apply_event(&store, &events, &new);
            assert!(store.order("cid-4").is_some());

            let terminal = json(&format!(
                r#"{{"e":"ORDER_TRADE_UPDATE","o":{{
                    "s":"BTCUSDT","c":"cid-4","i":1,"S":"BUY","ot":"LIMIT",
                    "X":"{status}","ap":"30000","l":"1","z":"1","rp":"0","m":false,"R":false
                }}}}"#
            ));
            apply_event(&store, &events, &terminal);
            assert!(store.order("cid-4").is_none(), "order not removed on {status}");
        }
    }

    #[test]
    fn partial_fill_updates_stored_order() {
        let (store, events, _rx) = fixture();
        let new = json(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{
                "s":"BTCUSDT","c":"cid-5","i":1,"S":"BUY","ot":"LIMIT",
                "X":"NEW","p":"30000","q":"2","z":"0","R":false
            }}"#,
        );
        apply_event(&store, &events, &new);

        let partial = json(
            r#"{"e":"ORDER_TRADE_UPDATE","o":{
                "s":"BTCUSDT","c":"cid-5","i":1,"S":"BUY","ot":"LIMIT",
                "X":"PARTIALLY_FILLED","ap":"30000","l":"0.5","z":"0.5","rp":"0",
                "m":false,"R":false
            }}"#,
        );
        apply_event(&store, &events, &partial);

        let order = store.order("cid-5").unwrap();
        assert_eq!(order.filled, 0.5);
        assert_eq!(order.filled + order.remaining, order.amount);
    }

    fn account_update() -> Value {
        json(
            r#"{"e":"ACCOUNT_UPDATE","a":{
                "P":[{"s":"BTCUSDT","ps":"LONG","pa":"2","ep":"30000","up":"150"}],
                "B":[{"a":"USDT","wb":"5000"}]
            }}"#,
        )
    }

    fn seeded_store() -> Store {
        let store = Store::new();
        store.set_positions(vec![Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 29000.0,
            contracts: 1.0,
            notional: 29000.0,
            leverage: 10,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
        }]);
        store.set_balance(Balance {
            total: 4000.0,
            assets: vec![BalanceAsset {
                symbol: "USDT".to_string(),
                wallet_balance: 4000.0,
                usd_value: 4000.0,
            }],
            ..Default::default()
        });
        store
    }

    #[test]
    fn account_update_folds_positions_and_balance() {
        let store = seeded_store();
        let (events, mut rx) = EventEmitter::channel();

        apply_event(&store, &events, &account_update());

        // Raw payload is forwarded first.
        assert!(matches!(rx.try_recv().unwrap(), AdapterEvent::PositionUpdate(_)));

        let p = store.position("BTCUSDT", PositionSide::Long).unwrap();
        assert_eq!(p.contracts, 2.0);
        assert_eq!(p.entry_price, 30000.0);
        assert!((p.notional - 60150.0).abs() < 1e-9);

        let balance = store.balance();
        assert_eq!(balance.total, 5000.0);
    }

    #[test]
    fn account_update_is_idempotent() {
        let store = seeded_store();
        let (events, _rx) = EventEmitter::channel();

        apply_event(&store, &events, &account_update());
        let first = (store.positions(), store.balance().total);
        apply_event(&store, &events, &account_update());
        let second = (store.positions(), store.balance().total);

        assert_eq!(first.1, second.1);
        assert_eq!(first.0[0].contracts, second.0[0].contracts);
        assert_eq!(first.0[0].notional, second.0[0].notional);
    }

    #[test]
    fn short_slot_decoded_from_both_by_sign() {
        let store = Store::new();
        store.set_positions(vec![Position {
            symbol: "ETHUSDT".to_string(),
            side: PositionSide::Short,
            entry_price: 2000.0,
            contracts: 1.0,
            notional: 2000.0,
            leverage: 5,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
        }]);
        let (events, _rx) = EventEmitter::channel();

        let v = json(
            r#"{"e":"ACCOUNT_UPDATE","a":{
                "P":[{"s":"ETHUSDT","ps":"BOTH","pa":"-3","ep":"2100","up":"-50"}]
            }}"#,
        );
        apply_event(&store, &events, &v);

        let p = store.position("ETHUSDT", PositionSide::Short).unwrap();
        assert_eq!(p.contracts, 3.0);
        assert_eq!(p.entry_price, 2100.0);
    }

    #[test]
    fn unknown_and_malformed_messages_are_dropped() {
        let (store, events, mut rx) = fixture();

        apply_event(&store, &events, &json(r#"{"e":"MARGIN_CALL"}"#));
        apply_event(&store, &events, &json(r#"{"no_event_type":true}"#));
        apply_event(&store, &events, &json(r#"{"e":"ORDER_TRADE_UPDATE"}"#));

        assert!(rx.try_recv().is_err());
        assert!(store.orders().is_empty());
    }

    #[test]
    fn balance_fold_uses_loaded_tickers() {
        let store = Store::new();
        store.set_tickers(vec![Ticker {
            symbol: "BNBUSDT".to_string(),
            last: 250.0,
            ..Default::default()
        }]);
        store.set_balance(Balance {
            assets: vec![BalanceAsset {
                symbol: "BNB".to_string(),
                wallet_balance: 1.0,
                usd_value: 250.0,
            }],
            ..Default::default()
        });
        let (events, _rx) = EventEmitter::channel();

        let v = json(r#"{"e":"ACCOUNT_UPDATE","a":{"B":[{"a":"BNB","wb":"4"}]}}"#);
        apply_event(&store, &events, &v);

        let balance = store.balance();
        assert_eq!(balance.assets[0].usd_value, 1000.0);
        assert_eq!(balance.total, 1000.0);
    }
}
