//! Market catalog construction.
//!
//! Translates the venue's exchange info and leverage brackets into the
//! immutable [`Market`] catalog. Admission rules: USDT-margined perpetuals
//! only, minus a fixed denylist of delisted symbols the venue still reports.

use std::collections::HashMap;

use serde_json::Value;

use keel_core::types::{
    AmountLimits, LeverageLimits, Market, MarketLimits, MarketPrecision, Ticker,
};

use crate::json_util::{f64_field, str_field};

/// Delisted instruments the venue keeps in exchange info; suppressed at load.
pub const DELISTED_SYMBOLS: [&str; 13] = [
    "BTSUSDT", "TOMOUSDT", "SCUSDT", "HNTUSDT", "SRMUSDT", "FTTUSDT", "RAYUSDT", "CVCUSDT",
    "COCOSUSDT", "STRAXUSDT", "DGBUSDT", "CTKUSDT", "ANTUSDT",
];

/// Build the market catalog from exchange info and leverage brackets.
pub fn build_markets(exchange_info: &Value, brackets: &Value) -> Vec<Market> {
    let max_leverage = bracket_max_leverage(brackets);

    exchange_info
        .get("symbols")
        .and_then(|s| s.as_array())
        .map(|symbols| {
            symbols
                .iter()
                .filter_map(|s| parse_market(s, &max_leverage))
                .collect()
        })
        .unwrap_or_default()
}

/// Map each symbol to the highest `initialLeverage` across its brackets.
fn bracket_max_leverage(brackets: &Value) -> HashMap<String, u32> {
    let mut map = HashMap::new();
    let Some(entries) = brackets.as_array() else {
        return map;
    };
    for entry in entries {
        let Some(symbol) = str_field(entry, "symbol") else {
            continue;
        };
        let max = entry
            .get("brackets")
            .and_then(|b| b.as_array())
            .map(|b| {
                b.iter()
                    .filter_map(|x| x.get("initialLeverage").and_then(|l| l.as_u64()))
                    .max()
                    .unwrap_or(1) as u32
            })
            .unwrap_or(1);
        map.insert(symbol.to_string(), max);
    }
    map
}

/// Parse one exchange-info symbol entry; `None` when it fails admission.
fn parse_market(v: &Value, max_leverage: &HashMap<String, u32>) -> Option<Market> {
    let symbol = str_field(v, "symbol")?;

    if str_field(v, "contractType")? != "PERPETUAL" {
        return None;
    }
    if str_field(v, "marginAsset")? != "USDT" {
        return None;
    }
    if DELISTED_SYMBOLS.contains(&symbol) {
        return None;
    }

    let base = str_field(v, "baseAsset")?;
    let quote = str_field(v, "quoteAsset")?;
    let margin = str_field(v, "marginAsset")?;
    let active = str_field(v, "status") == Some("TRADING");

    let filters = v.get("filters")?.as_array()?;
    let filter = |kind: &str| {
        filters
            .iter()
            .find(|f| str_field(f, "filterType") == Some(kind))
    };

    let lot = filter("LOT_SIZE")?;
    let price_filter = filter("PRICE_FILTER")?;
    let min_notional = filter("MIN_NOTIONAL")
        .and_then(|f| f64_field(f, "notional"))
        .unwrap_or(0.0);

    Some(Market {
        id: format!("{base}/{quote}:{margin}"),
        symbol: symbol.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        active,
        precision: MarketPrecision {
            amount: f64_field(lot, "stepSize")?,
            price: f64_field(price_filter, "tickSize")?,
        },
        limits: MarketLimits {
            amount: AmountLimits {
                min: f64_field(lot, "minQty")?,
                max: f64_field(lot, "maxQty")?,
            },
            min_notional,
            leverage: LeverageLimits {
                min: 1,
                max: *max_leverage.get(symbol).unwrap_or(&1),
            },
        },
    })
}

/// Assemble ticker snapshots from the 24h, book, and premium-index feeds.
///
/// Only catalog symbols get tickers; `open_interest` stays `0.0` because
/// none of these snapshots carries it.
pub fn build_tickers(markets: &[Market], t24: &Value, book: &Value, premium: &Value) -> Vec<Ticker> {
    let t24_map = index_by_symbol(t24);
    let book_map = index_by_symbol(book);
    let premium_map = index_by_symbol(premium);

    markets
        .iter()
        .map(|m| {
            let sym = m.symbol.as_str();
            let day = t24_map.get(sym);
            let bb = book_map.get(sym);
            let px = premium_map.get(sym);

            Ticker {
                symbol: m.symbol.clone(),
                bid: bb.and_then(|v| f64_field(v, "bidPrice")).unwrap_or(0.0),
                ask: bb.and_then(|v| f64_field(v, "askPrice")).unwrap_or(0.0),
                last: day.and_then(|v| f64_field(v, "lastPrice")).unwrap_or(0.0),
                mark: px.and_then(|v| f64_field(v, "markPrice")).unwrap_or(0.0),
                index: px.and_then(|v| f64_field(v, "indexPrice")).unwrap_or(0.0),
                percentage: day
                    .and_then(|v| f64_field(v, "priceChangePercent"))
                    .unwrap_or(0.0),
                funding_rate: px
                    .and_then(|v| f64_field(v, "lastFundingRate"))
                    .unwrap_or(0.0),
                volume: day.and_then(|v| f64_field(v, "volume")).unwrap_or(0.0),
                quote_volume: day
                    .and_then(|v| f64_field(v, "quoteVolume"))
                    .unwrap_or(0.0),
                open_interest: 0.0,
            }
        })
        .collect()
}

/// Index a venue array response by its `symbol` field.
fn index_by_symbol(v: &Value) -> HashMap<&str, &Value> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| str_field(item, "symbol").map(|s| (s, item)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(symbols: &str) -> Value {
        serde_json::from_str(&format!(r#"{{"symbols":[{symbols}]}}"#)).unwrap()
    }

    const BTC: &str = r#"{
        "symbol":"BTCUSDT","contractType":"PERPETUAL","marginAsset":"USDT",
        "baseAsset":"BTC","quoteAsset":"USDT","status":"TRADING",
        "filters":[
            {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001","maxQty":"1000"},
            {"filterType":"PRICE_FILTER","tickSize":"0.10"},
            {"filterType":"MIN_NOTIONAL","notional":"100"}
        ]
    }"#;

    #[test]
    fn admits_usdt_perpetuals_only() {
        let quarterly = BTC.replace("PERPETUAL", "CURRENT_QUARTER");
        let coin_margined = BTC.replace(r#""marginAsset":"USDT""#, r#""marginAsset":"BTC""#);
        let info = info_with(&format!("{BTC},{quarterly},{coin_margined}"));

        let markets = build_markets(&info, &Value::Null);
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].id, "BTC/USDT:USDT");
        assert!(markets[0].active);
    }

    #[test]
    fn suppresses_delisted_symbols() {
        let delisted = BTC.replace("BTCUSDT", "FTTUSDT");
        let info = info_with(&format!("{BTC},{delisted}"));

        let markets = build_markets(&info, &Value::Null);
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].symbol, "BTCUSDT");
    }

    #[test]
    fn extracts_filters_and_brackets() {
        let info = info_with(BTC);
        let brackets: Value = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","brackets":[
                {"initialLeverage":125},{"initialLeverage":50},{"initialLeverage":1}
            ]}]"#,
        )
        .unwrap();

        let markets = build_markets(&info, &brackets);
        let m = &markets[0];
        assert!(m.precision.amount > 0.0);
        assert!(m.precision.price > 0.0);
        assert!(m.limits.amount.min <= m.limits.amount.max);
        assert_eq!(m.limits.min_notional, 100.0);
        assert_eq!(m.limits.leverage.min, 1);
        assert_eq!(m.limits.leverage.max, 125);
    }

    #[test]
    fn tickers_merge_three_feeds() {
        let info = info_with(BTC);
        let markets = build_markets(&info, &Value::Null);

        let t24: Value = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","lastPrice":"30000","priceChangePercent":"1.5",
                 "volume":"1200","quoteVolume":"36000000"}]"#,
        )
        .unwrap();
        let book: Value = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","bidPrice":"29999.9","askPrice":"30000.1"}]"#,
        )
        .unwrap();
        let premium: Value = serde_json::from_str(
            r#"[{"symbol":"BTCUSDT","markPrice":"30001","indexPrice":"30002",
                 "lastFundingRate":"0.0001"}]"#,
        )
        .unwrap();

        let tickers = build_tickers(&markets, &t24, &book, &premium);
        assert_eq!(tickers.len(), 1);
        let t = &tickers[0];
        assert_eq!(t.last, 30000.0);
        assert_eq!(t.bid, 29999.9);
        assert_eq!(t.mark, 30001.0);
        assert_eq!(t.funding_rate, 0.0001);
        assert_eq!(t.open_interest, 0.0);
    }
}
