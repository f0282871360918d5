//! OKX v5 WebSocket Message Types
//!
//! Wire format types for the directives the client sends and the frames
//! the venue pushes back.
//!
//! # Outbound
//! - `Directive`: `{"op": "...", "args": [...]}` for login, subscribe and
//!   unsubscribe.
//!
//! # Inbound
//! - `InboundFrame`: every JSON frame, control or data, parsed into one
//!   envelope. The payload stays raw until a typed subscriber decodes it.
//! - `Push<T>`: an envelope whose `data` array was decoded into `T`.
//!
//! # Payloads
//! `Ticker`, `Trade`, `MarkPrice`, `Candle`, `Balance`, `Position`, `Order`.
//! Numeric fields arrive as strings and are parsed into `Decimal`; the
//! venue sends `""` for absent values, which maps to `None`.
//!
//! # References
//!
//! - [WebSocket API](https://www.okx.com/docs-v5/en/#overview-websocket)

use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::domain::subscription::Arg;

/// Event name of out-of-band error frames.
pub const ERROR_EVENT: &str = "error";

/// Event name of subscribe acknowledgements.
pub const SUBSCRIBE_EVENT: &str = "subscribe";

/// Event name of unsubscribe acknowledgements.
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribe";

/// Event name of login responses.
pub const LOGIN_EVENT: &str = "login";

/// Status code the venue uses for success.
pub const SUCCESS_CODE: &str = "0";

// =============================================================================
// Directives
// =============================================================================

/// Directive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Authenticate the connection.
    Login,
    /// Start a stream.
    Subscribe,
    /// Stop a stream.
    Unsubscribe,
}

impl Op {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outbound control message.
///
/// # Wire Format (JSON)
/// ```json
/// {"op":"subscribe","args":[{"channel":"trades","instId":"BTC-USDT"}]}
/// {"op":"login","args":[{"apiKey":"..","passphrase":"..","sign":"..","timestamp":".."}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive<A> {
    /// Operation.
    pub op: Op,
    /// Operation arguments.
    pub args: Vec<A>,
}

impl<A> Directive<A> {
    /// Directive with a single argument.
    #[must_use]
    pub fn single(op: Op, arg: A) -> Self {
        Self {
            op,
            args: vec![arg],
        }
    }
}

impl Directive<Arg> {
    /// `subscribe` directive for one stream.
    #[must_use]
    pub fn subscribe(arg: Arg) -> Self {
        Self::single(Op::Subscribe, arg)
    }

    /// `unsubscribe` directive for one stream.
    #[must_use]
    pub fn unsubscribe(arg: Arg) -> Self {
        Self::single(Op::Unsubscribe, arg)
    }
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Envelope of every inbound JSON frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"login","code":"0","msg":"","connId":"a4d3ae55"}
/// {"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"},"connId":"a4d3ae55"}
/// {"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}
/// {"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"px":"50000"}]}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// Control event name. Absent on data pushes.
    #[serde(default)]
    pub event: Option<String>,

    /// Status code; `"0"` or absent means success.
    #[serde(default, deserialize_with = "code_as_string")]
    pub code: Option<String>,

    /// Venue message accompanying `code`.
    #[serde(default)]
    pub msg: Option<String>,

    /// Venue-assigned connection ID.
    #[serde(default)]
    pub conn_id: Option<String>,

    /// Echo of the subscription argument.
    #[serde(default)]
    pub arg: Option<Arg>,

    /// `snapshot` or `update` on incremental channels.
    #[serde(default)]
    pub action: Option<String>,

    /// Raw `data` array, decoded on demand.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl InboundFrame {
    /// Event name, or `""` for data pushes.
    #[must_use]
    pub fn event(&self) -> &str {
        self.event.as_deref().unwrap_or_default()
    }

    /// Whether the frame reports success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.code.as_deref(), None | Some("" | SUCCESS_CODE))
    }

    /// Whether this is an out-of-band error frame.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.event() == ERROR_EVENT
    }

    /// Whether this is a subscribe or unsubscribe acknowledgement.
    #[must_use]
    pub fn is_subscription_ack(&self) -> bool {
        matches!(self.event(), SUBSCRIBE_EVENT | UNSUBSCRIBE_EVENT)
    }

    /// Status code, or `""` when absent.
    #[must_use]
    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    /// Venue message, or `""` when absent.
    #[must_use]
    pub fn msg(&self) -> &str {
        self.msg.as_deref().unwrap_or_default()
    }
}

/// A frame whose `data` array was decoded into `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Push<T> {
    /// Control event name, if any.
    pub event: Option<String>,
    /// Echo of the subscription argument.
    pub arg: Option<Arg>,
    /// `snapshot` or `update` on incremental channels.
    pub action: Option<String>,
    /// Decoded payload elements.
    pub data: Vec<T>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // Most frames carry the code as a string, a few as a bare number.
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(code)) => Ok(Some(code)),
        Some(serde_json::Value::Number(code)) => Ok(Some(code.to_string())),
        Some(other) => Err(de::Error::custom(format!("unexpected code: {other}"))),
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

// =============================================================================
// Public Payloads
// =============================================================================

/// `tickers` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Instrument type.
    #[serde(default)]
    pub inst_type: String,
    /// Instrument ID.
    pub inst_id: String,
    /// Last traded price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub last: Option<Decimal>,
    /// Last traded size.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub last_sz: Option<Decimal>,
    /// Best ask price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ask_px: Option<Decimal>,
    /// Best ask size.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub ask_sz: Option<Decimal>,
    /// Best bid price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub bid_px: Option<Decimal>,
    /// Best bid size.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub bid_sz: Option<Decimal>,
    /// 24h open.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub open24h: Option<Decimal>,
    /// 24h high.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub high24h: Option<Decimal>,
    /// 24h low.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub low24h: Option<Decimal>,
    /// 24h volume in base currency.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub vol24h: Option<Decimal>,
    /// Push time, Unix milliseconds as a string.
    #[serde(default)]
    pub ts: String,
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// `trades` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Instrument ID.
    pub inst_id: String,
    /// Trade ID.
    pub trade_id: String,
    /// Price.
    pub px: Decimal,
    /// Size.
    pub sz: Decimal,
    /// Taker side.
    pub side: Side,
    /// Trade time, Unix milliseconds as a string.
    pub ts: String,
}

/// `mark-price` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPrice {
    /// Instrument type.
    pub inst_type: String,
    /// Instrument ID.
    pub inst_id: String,
    /// Mark price.
    pub mark_px: Decimal,
    /// Push time, Unix milliseconds as a string.
    pub ts: String,
}

/// `candle*` channel element.
///
/// # Wire Format (JSON)
/// ```json
/// ["1597026383085","8533.02","8553.74","8527.17","8548.26","45247","529.5858061","5.3","0"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct Candle {
    /// Bar open time, Unix milliseconds.
    pub ts: i64,
    /// Open.
    pub open: Decimal,
    /// High.
    pub high: Decimal,
    /// Low.
    pub low: Decimal,
    /// Close.
    pub close: Decimal,
    /// Volume in contracts or base currency.
    pub vol: Decimal,
    /// Whether the bar is closed.
    pub confirmed: bool,
}

impl TryFrom<Vec<String>> for Candle {
    type Error = String;

    fn try_from(fields: Vec<String>) -> Result<Self, Self::Error> {
        if fields.len() < 6 {
            return Err(format!("candle needs at least 6 fields, got {}", fields.len()));
        }
        let decimal = |i: usize| -> Result<Decimal, String> {
            fields[i]
                .parse()
                .map_err(|e| format!("candle field {i} ({}): {e}", fields[i]))
        };

        Ok(Self {
            ts: fields[0]
                .parse()
                .map_err(|e| format!("candle timestamp ({}): {e}", fields[0]))?,
            open: decimal(1)?,
            high: decimal(2)?,
            low: decimal(3)?,
            close: decimal(4)?,
            vol: decimal(5)?,
            confirmed: fields.last().is_some_and(|s| s == "1") && fields.len() > 6,
        })
    }
}

// =============================================================================
// Private Payloads
// =============================================================================

/// `account` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Total equity in USD.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub total_eq: Option<Decimal>,
    /// Adjusted equity in USD.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub adj_eq: Option<Decimal>,
    /// Update time, Unix milliseconds as a string.
    #[serde(default)]
    pub u_time: String,
    /// Per-currency detail.
    #[serde(default)]
    pub details: Vec<BalanceDetail>,
}

/// One currency inside a `Balance`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceDetail {
    /// Currency.
    pub ccy: String,
    /// Equity of the currency.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub eq: Option<Decimal>,
    /// Cash balance.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub cash_bal: Option<Decimal>,
    /// Available balance.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub avail_bal: Option<Decimal>,
    /// Frozen balance.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub frozen_bal: Option<Decimal>,
}

/// `positions` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Instrument type.
    pub inst_type: String,
    /// Instrument ID.
    pub inst_id: String,
    /// Position ID.
    #[serde(default)]
    pub pos_id: String,
    /// `long`, `short` or `net`.
    #[serde(default)]
    pub pos_side: String,
    /// Quantity.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub pos: Option<Decimal>,
    /// Average open price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub avg_px: Option<Decimal>,
    /// Unrealized profit and loss.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub upl: Option<Decimal>,
    /// Leverage.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub lever: Option<Decimal>,
    /// Update time, Unix milliseconds as a string.
    #[serde(default)]
    pub u_time: String,
}

/// `orders` channel element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Instrument type.
    pub inst_type: String,
    /// Instrument ID.
    pub inst_id: String,
    /// Venue order ID.
    pub ord_id: String,
    /// Client order ID.
    #[serde(default)]
    pub cl_ord_id: String,
    /// Order side.
    pub side: Side,
    /// Order type (`market`, `limit`, ...).
    pub ord_type: String,
    /// Order state (`live`, `partially_filled`, `filled`, `canceled`).
    pub state: String,
    /// Limit price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub px: Option<Decimal>,
    /// Quantity.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sz: Option<Decimal>,
    /// Accumulated fill quantity.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub acc_fill_sz: Option<Decimal>,
    /// Average fill price.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub avg_px: Option<Decimal>,
    /// Update time, Unix milliseconds as a string.
    #[serde(default)]
    pub u_time: String,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn subscribe_directive_wire_shape() {
        let directive = Directive::subscribe(Arg::instrument("trades", "BTC-USDT"));
        assert_eq!(
            serde_json::to_string(&directive).unwrap(),
            r#"{"op":"subscribe","args":[{"channel":"trades","instId":"BTC-USDT"}]}"#
        );
    }

    #[test]
    fn uid_is_never_sent() {
        let mut arg = Arg::new("account");
        arg.uid = Some("44705892343619584".to_string());
        assert_eq!(
            serde_json::to_string(&Directive::unsubscribe(arg)).unwrap(),
            r#"{"op":"unsubscribe","args":[{"channel":"account"}]}"#
        );
    }

    #[test]
    fn login_response_parses() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"event":"login","code":"0","msg":"","connId":"a4d3ae55"}"#)
                .unwrap();
        assert_eq!(frame.event(), LOGIN_EVENT);
        assert!(frame.is_success());
        assert_eq!(frame.conn_id.as_deref(), Some("a4d3ae55"));
        assert!(frame.arg.is_none());
    }

    #[test]
    fn numeric_code_is_accepted() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"event":"error","code":60009,"msg":"Login failed."}"#).unwrap();
        assert!(frame.is_error());
        assert!(!frame.is_success());
        assert_eq!(frame.code(), "60009");
    }

    #[test]
    fn data_push_keeps_payload_raw() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"px":"50000"}]}"#,
        )
        .unwrap();
        assert_eq!(frame.event(), "");
        assert_eq!(frame.data.unwrap().get(), r#"[{"px":"50000"}]"#);
    }

    #[test]
    fn ticker_with_empty_fields() {
        let ticker: Ticker = serde_json::from_str(
            r#"{"instType":"SPOT","instId":"BTC-USDT","last":"50000.1","lastSz":"","askPx":"50000.2","ts":"1597026383085"}"#,
        )
        .unwrap();
        assert_eq!(ticker.last, Some(Decimal::from_str("50000.1").unwrap()));
        assert_eq!(ticker.last_sz, None);
        assert_eq!(ticker.bid_px, None);
    }

    #[test]
    fn candle_from_array() {
        let candle: Candle = serde_json::from_str(
            r#"["1597026383085","8533.02","8553.74","8527.17","8548.26","45247","529.5858061","5.3","1"]"#,
        )
        .unwrap();
        assert_eq!(candle.ts, 1_597_026_383_085);
        assert_eq!(candle.close, Decimal::from_str("8548.26").unwrap());
        assert!(candle.confirmed);
    }

    #[test]
    fn short_candle_is_rejected() {
        let result: Result<Candle, _> = serde_json::from_str(r#"["1597026383085","1"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn balance_details() {
        let balance: Balance = serde_json::from_str(
            r#"{"totalEq":"41624.32","uTime":"1614846244194","details":[{"ccy":"BTC","eq":"1.5","availBal":"","cashBal":"1.5"}]}"#,
        )
        .unwrap();
        assert_eq!(balance.details.len(), 1);
        assert_eq!(balance.details[0].avail_bal, None);
        assert_eq!(balance.details[0].cash_bal, Some(Decimal::from_str("1.5").unwrap()));
    }
}
