//! Order formatting: placement intents → venue payloads.
//!
//! Pure transforms over a catalog/store snapshot. Every emitted payload is
//! quantized to the market's amount and price steps, honors the venue's
//! per-order maximum size and minimum notional, and carries a fresh client
//! order ID assigned as the final step.
//!
//! Hedge-mode accounts encode position direction through `positionSide`;
//! one-way accounts send `BOTH` and use `reduceOnly` for closing intents.

use keel_core::error::AdapterError;
use keel_core::events::EventEmitter;
use keel_core::store::Store;
use keel_core::types::{
    Market, OrderKind, OrderSide, PositionSide, SimpleIntent, SplitIntent,
};

use crate::payload::{PayloadOrder, venue_order_type, venue_side, venue_time_in_force};

/// Formats placement intents against the current store snapshot.
pub struct OrderFormatter<'a> {
    store: &'a Store,
    events: &'a EventEmitter,
}

impl<'a> OrderFormatter<'a> {
    pub fn new(store: &'a Store, events: &'a EventEmitter) -> Self {
        Self { store, events }
    }

    /// Format a single-order intent into one or more payloads.
    ///
    /// Emits extra payloads for oversized amounts (max-size lots plus a
    /// remainder) and for attached stop-loss / take-profit legs.
    pub fn format(&self, intent: &SimpleIntent) -> Result<Vec<PayloadOrder>, AdapterError> {
        let market = self
            .store
            .market(&intent.symbol)
            .ok_or_else(|| AdapterError::MarketNotFound(intent.symbol.clone()))?;

        if intent.kind == OrderKind::TrailingStopLoss {
            return self.format_trailing(intent, &market);
        }

        let hedged = self.store.hedged();
        let step = market.precision.amount;
        let tick = market.precision.price;

        let mut base = PayloadOrder::new();
        base.set("symbol", &market.symbol);
        base.set(
            "positionSide",
            position_side_for(hedged, intent.kind, intent.side, intent.reduce_only),
        );
        base.set("side", venue_side(intent.side));
        base.set("type", venue_order_type(intent.kind));

        let mut payloads = Vec::new();

        match intent.kind {
            OrderKind::StopLoss | OrderKind::TakeProfit => {
                // Trigger orders close the whole position: stopPrice +
                // closePosition, never price, quantity, or reduceOnly.
                if let Some(trigger) = intent.price {
                    base.set("stopPrice", fmt_step(round_to_step(trigger, tick), tick));
                }
                base.set("closePosition", "true");
                payloads.push(base.clone());
            }
            _ => {
                if intent.kind == OrderKind::Limit {
                    if let Some(price) = intent.price {
                        base.set("price", fmt_step(round_to_step(price, tick), tick));
                    }
                    base.set(
                        "timeInForce",
                        venue_time_in_force(intent.time_in_force.unwrap_or_default()),
                    );
                }
                if intent.reduce_only && !hedged {
                    base.set("reduceOnly", "true");
                }

                let max = market.limits.amount.max;
                if intent.amount > max {
                    // Fan out into equal max-bounded lots plus a remainder.
                    let lots = (intent.amount / max).ceil() as usize;
                    let lot = floor_to_step(intent.amount / lots as f64, step);
                    for _ in 0..lots {
                        let mut p = base.clone();
                        p.set("quantity", fmt_step(lot, step));
                        payloads.push(p);
                    }
                    let rest = intent.amount - lot * lots as f64;
                    if rest + 1e-9 >= step {
                        let mut p = base.clone();
                        p.set("quantity", fmt_trim(rest));
                        payloads.push(p);
                    }
                } else {
                    base.set("quantity", fmt_step(floor_to_step(intent.amount, step), step));
                    payloads.push(base.clone());
                }
            }
        }

        if let Some(trigger) = intent.stop_loss {
            payloads.push(attached_trigger(
                &market,
                hedged,
                intent.side,
                OrderKind::StopLoss,
                trigger,
            ));
        }
        if let Some(trigger) = intent.take_profit {
            payloads.push(attached_trigger(
                &market,
                hedged,
                intent.side,
                OrderKind::TakeProfit,
                trigger,
            ));
        }

        for p in &mut payloads {
            p.assign_client_id();
        }
        Ok(payloads)
    }

    /// Trailing stops close an existing position: quantity is the position
    /// size and the callback rate derives from the distance between the
    /// reference price and the current last price.
    fn format_trailing(
        &self,
        intent: &SimpleIntent,
        market: &Market,
    ) -> Result<Vec<PayloadOrder>, AdapterError> {
        let ticker = self
            .store
            .ticker(&market.symbol)
            .ok_or_else(|| AdapterError::TickerNotFound(market.symbol.clone()))?;

        let close_side = match intent.side {
            OrderSide::Sell => PositionSide::Long,
            OrderSide::Buy => PositionSide::Short,
        };
        let position = self
            .store
            .position(&market.symbol, close_side)
            .filter(|p| p.contracts > 0.0)
            .ok_or_else(|| {
                AdapterError::PositionNotFound(format!("{} {}", market.symbol, close_side))
            })?;

        let reference = intent.price.ok_or_else(|| {
            AdapterError::ScaleInfeasible("trailing stop requires a reference price".into())
        })?;

        let step = market.precision.amount;
        let tick = market.precision.price;
        let distance = floor_to_step((ticker.last - reference).abs(), tick);
        let callback_rate = (distance * 100.0 / ticker.last * 10.0).round() / 10.0;

        let mut p = PayloadOrder::new();
        p.set("symbol", &market.symbol);
        p.set(
            "positionSide",
            position_side_for(self.store.hedged(), intent.kind, intent.side, intent.reduce_only),
        );
        p.set("side", venue_side(intent.side));
        p.set("type", venue_order_type(OrderKind::TrailingStopLoss));
        p.set("quantity", fmt_step(floor_to_step(position.contracts, step), step));
        p.set("callbackRate", fmt_trim(callback_rate));
        p.set("priceProtect", "true");
        p.assign_client_id();
        Ok(vec![p])
    }

    /// Format a scaled split order: `orders` rungs from `from_price` to
    /// `to_price`, sizes weighted linearly from `from_scale` to `to_scale`.
    ///
    /// Infeasible scales emit an error event and return an empty list; with
    /// `auto_re_adjust` the rung count shrinks (never below 3) until the
    /// smallest slice is tradable.
    pub fn format_split(&self, intent: &SplitIntent) -> Result<Vec<PayloadOrder>, AdapterError> {
        let market = self
            .store
            .market(&intent.symbol)
            .ok_or_else(|| AdapterError::MarketNotFound(intent.symbol.clone()))?;

        let requested = intent.orders as usize;
        if requested < 2 {
            return Err(AdapterError::ScaleInfeasible(
                "split requires at least two orders".into(),
            ));
        }

        let (p0, p1) = (intent.from_price, intent.to_price);
        let (s0, s1) = (intent.from_scale, intent.to_scale);
        let avg_price = (p0 + p1) / 2.0;
        let total_qty = intent.amount / avg_price;
        let min_size = market.limits.amount.min;
        let min_notional = market.limits.min_notional;

        let weight_sum = |n: usize| -> f64 {
            if (s1 - s0).abs() < f64::EPSILON {
                n as f64 * s0
            } else {
                (0..n)
                    .map(|i| s0 + (s1 - s0) * i as f64 / (n - 1) as f64)
                    .sum()
            }
        };
        let feasible = |n: usize| {
            let lowest = s0 / weight_sum(n) * total_qty;
            lowest >= min_size && lowest * p0 >= min_notional
        };

        let mut n = requested;
        if !feasible(n) {
            if !intent.auto_re_adjust {
                self.events.error("Scale too extreme");
                return Ok(Vec::new());
            }
            match (3..=requested).rev().find(|&k| feasible(k)) {
                Some(k) => n = k,
                None => {
                    self.events.error("cannot split");
                    return Ok(Vec::new());
                }
            }
        }

        let step = market.precision.amount;
        let tick = market.precision.price;
        let w = weight_sum(n);
        let price_step = (p1 - p0) / (n - 1) as f64;
        let position_side =
            position_side_for(self.store.hedged(), intent.kind, intent.side, false);

        let mut payloads = Vec::with_capacity(n);
        for i in 0..n {
            let weight = s0 + (s1 - s0) * i as f64 / (n - 1) as f64;
            let price = p0 + price_step * i as f64;
            let mut size = total_qty * weight / w;
            // Rungs too thin for the venue's notional floor get promoted.
            if size * price < 1.05 * min_notional {
                size = 1.1 * min_notional / price;
            }

            let mut p = PayloadOrder::new();
            p.set("symbol", &market.symbol);
            p.set("positionSide", position_side);
            p.set("side", venue_side(intent.side));
            p.set("type", venue_order_type(intent.kind));
            p.set("quantity", fmt_step(floor_to_step(size, step), step));
            p.set("price", fmt_step(round_to_step(price, tick), tick));
            p.set("timeInForce", "GTC");
            p.set("reduceOnly", "false");
            p.assign_client_id();
            payloads.push(p);
        }
        Ok(payloads)
    }
}

// ---------------------------------------------------------------------------
// Position side resolution
// ---------------------------------------------------------------------------

/// Resolve the `positionSide` field for an intent.
///
/// One-way accounts always send `BOTH`. Hedged accounts map Buy→LONG and
/// Sell→SHORT, flipped for protective order types and reduce-only intents
/// (those act on the position opposite their order side).
pub fn position_side_for(
    hedged: bool,
    kind: OrderKind,
    side: OrderSide,
    reduce_only: bool,
) -> &'static str {
    if !hedged {
        return "BOTH";
    }
    let closing = kind.is_protective() || reduce_only;
    match (side, closing) {
        (OrderSide::Buy, false) | (OrderSide::Sell, true) => "LONG",
        (OrderSide::Sell, false) | (OrderSide::Buy, true) => "SHORT",
    }
}

/// Attached SL/TP leg: opposite side, trigger price, closes the position.
fn attached_trigger(
    market: &Market,
    hedged: bool,
    primary_side: OrderSide,
    kind: OrderKind,
    trigger: f64,
) -> PayloadOrder {
    let side = primary_side.opposite();
    let position_side = if hedged {
        match side {
            OrderSide::Buy => "LONG",
            OrderSide::Sell => "SHORT",
        }
    } else {
        "BOTH"
    };

    let tick = market.precision.price;
    let mut p = PayloadOrder::new();
    p.set("symbol", &market.symbol);
    p.set("positionSide", position_side);
    p.set("side", venue_side(side));
    p.set("type", venue_order_type(kind));
    p.set("stopPrice", fmt_step(round_to_step(trigger, tick), tick));
    p.set("closePosition", "true");
    p
}

// ---------------------------------------------------------------------------
// Quantization helpers
// ---------------------------------------------------------------------------

/// Floor toward zero at the step boundary (with a float-noise guard for
/// values sitting exactly on the grid).
fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    ((value / step) + 1e-9).floor() * step
}

/// Round to the nearest step multiple.
fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

/// Number of fractional digits implied by a step size (0.001 → 3).
fn step_decimals(step: f64) -> usize {
    let mut s = step;
    let mut d = 0;
    while d < 8 && (s - s.round()).abs() > 1e-9 {
        s *= 10.0;
        d += 1;
    }
    d
}

/// Format a value with the step's decimal count.
fn fmt_step(value: f64, step: f64) -> String {
    format!("{:.*}", step_decimals(step), value)
}

/// Format a value trimmed of trailing zeros (remainder lots, callback rates).
fn fmt_trim(value: f64) -> String {
    let s = format!("{value:.8}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::events::AdapterEvent;
    use keel_core::types::{
        AmountLimits, Balance, LeverageLimits, MarketLimits, MarketPrecision, Position, Ticker,
        TimeInForce,
    };

    fn market(symbol: &str, step: f64, tick: f64, max: f64, min_notional: f64) -> Market {
        Market {
            id: format!("{}/USDT:USDT", symbol.trim_end_matches("USDT")),
            symbol: symbol.to_string(),
            base: symbol.trim_end_matches("USDT").to_string(),
            quote: "USDT".to_string(),
            active: true,
            precision: MarketPrecision { amount: step, price: tick },
            limits: MarketLimits {
                amount: AmountLimits { min: step, max },
                min_notional,
                leverage: LeverageLimits { min: 1, max: 125 },
            },
        }
    }

    fn store_with(markets: Vec<Market>) -> Store {
        let store = Store::new();
        store.set_markets(markets);
        store.set_balance(Balance::default());
        store
    }

    fn buy_limit(symbol: &str, price: f64, amount: f64) -> SimpleIntent {
        SimpleIntent {
            symbol: symbol.to_string(),
            kind: OrderKind::Limit,
            side: OrderSide::Buy,
            price: Some(price),
            amount,
            time_in_force: None,
            reduce_only: false,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn oversized_amount_splits_into_lots_plus_remainder() {
        let store = store_with(vec![market("XRPUSDT", 0.1, 0.0001, 100.0, 5.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let payloads = fmt.format(&buy_limit("XRPUSDT", 0.5, 250.35)).unwrap();

        let quantities: Vec<&str> = payloads.iter().map(|p| p.get("quantity").unwrap()).collect();
        assert_eq!(quantities, vec!["83.4", "83.4", "83.4", "0.15"]);

        // Shared request skeleton, distinct client IDs.
        for p in &payloads {
            assert_eq!(p.get("symbol"), Some("XRPUSDT"));
            assert_eq!(p.get("side"), Some("BUY"));
            assert_eq!(p.get("type"), Some("LIMIT"));
        }
        let mut ids: Vec<&str> = payloads.iter().map(|p| p.client_order_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn limit_order_snaps_amount_and_price() {
        let store = store_with(vec![market("BTCUSDT", 0.001, 0.1, 1000.0, 100.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let payloads = fmt.format(&buy_limit("BTCUSDT", 30000.123, 1.23456)).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].get("quantity"), Some("1.234"));
        assert_eq!(payloads[0].get("price"), Some("30000.1"));
        assert_eq!(payloads[0].get("timeInForce"), Some("GTC"));
        assert_eq!(payloads[0].get("positionSide"), Some("BOTH"));
    }

    #[test]
    fn market_order_carries_no_price_or_tif() {
        let store = store_with(vec![market("BTCUSDT", 0.001, 0.1, 1000.0, 100.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let mut intent = buy_limit("BTCUSDT", 0.0, 1.0);
        intent.kind = OrderKind::Market;
        intent.price = None;

        let payloads = fmt.format(&intent).unwrap();
        assert_eq!(payloads[0].get("price"), None);
        assert_eq!(payloads[0].get("timeInForce"), None);
        assert_eq!(payloads[0].get("quantity"), Some("1.000"));
    }

    #[test]
    fn hedge_mode_stop_loss_attachment() {
        let store = store_with(vec![market("ETHUSDT", 0.001, 0.01, 10000.0, 5.0)]);
        store.set_hedged(true);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let mut intent = buy_limit("ETHUSDT", 100.0, 1.0);
        intent.stop_loss = Some(95.0);

        let payloads = fmt.format(&intent).unwrap();
        assert_eq!(payloads.len(), 2);

        let primary = &payloads[0];
        assert_eq!(primary.get("positionSide"), Some("LONG"));
        assert_eq!(primary.get("side"), Some("BUY"));
        // Hedge accounts never send reduceOnly.
        assert_eq!(primary.get("reduceOnly"), None);

        let stop = &payloads[1];
        assert_eq!(stop.get("side"), Some("SELL"));
        assert_eq!(stop.get("positionSide"), Some("SHORT"));
        assert_eq!(stop.get("type"), Some("STOP_MARKET"));
        assert_eq!(stop.get("closePosition"), Some("true"));
        assert_eq!(stop.get("stopPrice"), Some("95.00"));
        assert_eq!(stop.get("price"), None);
        assert_eq!(stop.get("reduceOnly"), None);
        assert_eq!(stop.get("quantity"), None);
    }

    #[test]
    fn formatting_is_idempotent_modulo_client_id() {
        let store = store_with(vec![market("BTCUSDT", 0.001, 0.1, 1000.0, 100.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);
        let intent = buy_limit("BTCUSDT", 30000.0, 1.0);

        let a = fmt.format(&intent).unwrap();
        let b = fmt.format(&intent).unwrap();
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(&b) {
            let fa: Vec<_> = pa.pairs().filter(|(k, _)| *k != "newClientOrderId").collect();
            let fb: Vec<_> = pb.pairs().filter(|(k, _)| *k != "newClientOrderId").collect();
            assert_eq!(fa, fb);
            assert_ne!(pa.client_order_id(), pb.client_order_id());
        }
    }

    #[test]
    fn unknown_symbol_is_market_not_found() {
        let store = store_with(vec![]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let err = fmt.format(&buy_limit("NOPEUSDT", 1.0, 1.0)).unwrap_err();
        assert!(matches!(err, AdapterError::MarketNotFound(_)));
    }

    #[test]
    fn position_side_resolution() {
        assert_eq!(position_side_for(false, OrderKind::Limit, OrderSide::Buy, false), "BOTH");
        assert_eq!(position_side_for(true, OrderKind::Limit, OrderSide::Buy, false), "LONG");
        assert_eq!(position_side_for(true, OrderKind::Limit, OrderSide::Sell, false), "SHORT");
        // Protective and reduce-only intents flip.
        assert_eq!(position_side_for(true, OrderKind::StopLoss, OrderSide::Sell, false), "LONG");
        assert_eq!(position_side_for(true, OrderKind::Limit, OrderSide::Buy, true), "SHORT");
        assert_eq!(
            position_side_for(true, OrderKind::TrailingStopLoss, OrderSide::Sell, false),
            "LONG"
        );
    }

    #[test]
    fn trailing_stop_uses_position_size_and_callback_rate() {
        let store = store_with(vec![market("ETHUSDT", 0.001, 0.01, 10000.0, 5.0)]);
        store.set_tickers(vec![Ticker {
            symbol: "ETHUSDT".to_string(),
            last: 2000.0,
            ..Default::default()
        }]);
        store.set_positions(vec![Position {
            symbol: "ETHUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 1900.0,
            contracts: 2.5,
            notional: 4750.0,
            leverage: 10,
            unrealized_pnl: 250.0,
            liquidation_price: 0.0,
        }]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let intent = SimpleIntent {
            symbol: "ETHUSDT".to_string(),
            kind: OrderKind::TrailingStopLoss,
            side: OrderSide::Sell,
            price: Some(1950.0),
            amount: 0.0,
            time_in_force: None,
            reduce_only: false,
            stop_loss: None,
            take_profit: None,
        };

        let payloads = fmt.format(&intent).unwrap();
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_eq!(p.get("type"), Some("TRAILING_STOP_MARKET"));
        assert_eq!(p.get("quantity"), Some("2.500"));
        // |2000 - 1950| / 2000 · 100 = 2.5%
        assert_eq!(p.get("callbackRate"), Some("2.5"));
        assert_eq!(p.get("priceProtect"), Some("true"));
    }

    #[test]
    fn trailing_without_position_fails() {
        let store = store_with(vec![market("ETHUSDT", 0.001, 0.01, 10000.0, 5.0)]);
        store.set_tickers(vec![Ticker {
            symbol: "ETHUSDT".to_string(),
            last: 2000.0,
            ..Default::default()
        }]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let intent = SimpleIntent {
            symbol: "ETHUSDT".to_string(),
            kind: OrderKind::TrailingStopLoss,
            side: OrderSide::Sell,
            price: Some(1950.0),
            amount: 0.0,
            time_in_force: None,
            reduce_only: false,
            stop_loss: None,
            take_profit: None,
        };
        let err = fmt.format(&intent).unwrap_err();
        assert!(matches!(err, AdapterError::PositionNotFound(_)));
    }

    fn split(orders: u32, s0: f64, s1: f64, amount: f64, auto: bool) -> SplitIntent {
        SplitIntent {
            symbol: "OPUSDT".to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            amount,
            orders,
            from_price: 100.0,
            to_price: 110.0,
            from_scale: s0,
            to_scale: s1,
            auto_re_adjust: auto,
        }
    }

    #[test]
    fn split_flat_scale_distributes_evenly() {
        let store = store_with(vec![market("OPUSDT", 0.001, 0.1, 100000.0, 5.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let payloads = fmt.format_split(&split(5, 1.0, 1.0, 100.0, false)).unwrap();
        assert_eq!(payloads.len(), 5);

        let prices: Vec<&str> = payloads.iter().map(|p| p.get("price").unwrap()).collect();
        assert_eq!(prices, vec!["100.0", "102.5", "105.0", "107.5", "110.0"]);
        for p in &payloads {
            // totalQty = 100 / 105 spread over 5 equal rungs, floor-snapped.
            assert_eq!(p.get("quantity"), Some("0.190"));
            assert_eq!(p.get("timeInForce"), Some("GTC"));
            assert_eq!(p.get("reduceOnly"), Some("false"));
        }
    }

    #[test]
    fn split_auto_readjust_shrinks_rung_count() {
        let store = store_with(vec![market("OPUSDT", 0.001, 0.1, 100000.0, 5.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        // At 10 rungs the smallest slice misses the notional floor; 3 works.
        let payloads = fmt.format_split(&split(10, 1.0, 20.0, 200.0, true)).unwrap();
        assert_eq!(payloads.len(), 3);
        let prices: Vec<&str> = payloads.iter().map(|p| p.get("price").unwrap()).collect();
        assert_eq!(prices, vec!["100.0", "105.0", "110.0"]);
    }

    #[test]
    fn split_infeasible_emits_cannot_split() {
        let store = store_with(vec![market("OPUSDT", 0.001, 0.1, 100000.0, 5.0)]);
        let (events, mut rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let payloads = fmt.format_split(&split(10, 1.0, 20.0, 12.0, true)).unwrap();
        assert!(payloads.is_empty());
        match rx.try_recv().unwrap() {
            AdapterEvent::Error(msg) => assert_eq!(msg, "cannot split"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn split_without_readjust_reports_scale_too_extreme() {
        let store = store_with(vec![market("OPUSDT", 0.001, 0.1, 100000.0, 5.0)]);
        let (events, mut rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let payloads = fmt.format_split(&split(10, 1.0, 20.0, 12.0, false)).unwrap();
        assert!(payloads.is_empty());
        match rx.try_recv().unwrap() {
            AdapterEvent::Error(msg) => assert_eq!(msg, "Scale too extreme"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn split_promotes_rungs_below_notional_floor() {
        let store = store_with(vec![market("OPUSDT", 0.001, 0.1, 100000.0, 5.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        // The smallest slice passes feasibility (≈5.02 quote) but sits inside
        // the 1.05× guard band, so it gets promoted to 1.1× the floor.
        let payloads = fmt.format_split(&split(5, 1.0, 10.0, 145.0, false)).unwrap();
        assert_eq!(payloads.len(), 5);
        assert_eq!(payloads[0].get("quantity"), Some("0.055"));
        for p in &payloads {
            let qty: f64 = p.get("quantity").unwrap().parse().unwrap();
            let price: f64 = p.get("price").unwrap().parse().unwrap();
            assert!(qty * price >= 5.0, "rung below min notional: {qty} × {price}");
        }
    }

    #[test]
    fn quantization_helpers() {
        assert_eq!(fmt_step(floor_to_step(0.2, 0.1), 0.1), "0.2");
        assert_eq!(fmt_step(floor_to_step(83.45, 0.1), 0.1), "83.4");
        assert_eq!(fmt_step(round_to_step(102.5, 0.1), 0.1), "102.5");
        assert_eq!(fmt_step(round_to_step(30000.123, 0.1), 0.1), "30000.1");
        assert_eq!(fmt_trim(0.15000000000000197), "0.15");
        assert_eq!(fmt_trim(2.5), "2.5");
        assert_eq!(fmt_trim(5.0), "5");
    }

    #[test]
    fn time_in_force_only_for_limit_orders() {
        let store = store_with(vec![market("BTCUSDT", 0.001, 0.1, 1000.0, 100.0)]);
        let (events, _rx) = EventEmitter::channel();
        let fmt = OrderFormatter::new(&store, &events);

        let mut intent = buy_limit("BTCUSDT", 30000.0, 1.0);
        intent.time_in_force = Some(TimeInForce::PostOnly);
        let payloads = fmt.format(&intent).unwrap();
        assert_eq!(payloads[0].get("timeInForce"), Some("GTX"));
    }
}
