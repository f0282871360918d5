//! Subscription Arguments and Topic Keys
//!
//! Domain types identifying one logical stream on the venue feed.
//!
//! # Design
//!
//! A subscription argument (`Arg`) names a channel plus the instrument
//! identifiers that scope it. Every argument maps to exactly one
//! [`TopicKey`], which is the key the dispatch registry files handlers
//! under. Push frames echo the argument back, so the same derivation applied
//! to an inbound frame finds the handler that asked for it.
//!
//! Handlers are filed under a [`WatchKey`], which keeps topic keys and raw
//! event names (`login`, `error`, ...) in separate namespaces so a crafted
//! channel name can never shadow a control event.

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Subscription Argument
// =============================================================================

/// Subscription argument as it appears on the wire.
///
/// # Wire Format (JSON)
/// ```json
/// {"channel": "tickers", "instId": "BTC-USDT"}
/// {"channel": "orders", "instType": "ANY"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arg {
    /// Channel name (e.g. `tickers`, `trades`, `account`).
    #[serde(default)]
    pub channel: String,

    /// Instrument type (`SPOT`, `SWAP`, `FUTURES`, `OPTION`, `ANY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<String>,

    /// Instrument family (e.g. `BTC-USD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_family: Option<String>,

    /// Instrument ID (e.g. `BTC-USDT`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,

    /// Currency filter for account channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccy: Option<String>,

    /// User ID echoed by the venue on private pushes.
    ///
    /// Never sent, and excluded from the topic key: the venue adds it to
    /// push frames for arguments that were subscribed without it.
    #[serde(default, skip_serializing)]
    pub uid: Option<String>,
}

impl Arg {
    /// Create an argument for a channel with no instrument scope.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Create an argument for a channel scoped to one instrument.
    #[must_use]
    pub fn instrument(channel: impl Into<String>, inst_id: impl Into<String>) -> Self {
        Self::new(channel).with_inst_id(inst_id)
    }

    /// Set the instrument ID.
    #[must_use]
    pub fn with_inst_id(mut self, inst_id: impl Into<String>) -> Self {
        self.inst_id = Some(inst_id.into());
        self
    }

    /// Set the instrument type.
    #[must_use]
    pub fn with_inst_type(mut self, inst_type: impl Into<String>) -> Self {
        self.inst_type = Some(inst_type.into());
        self
    }

    /// Set the instrument family.
    #[must_use]
    pub fn with_inst_family(mut self, inst_family: impl Into<String>) -> Self {
        self.inst_family = Some(inst_family.into());
        self
    }

    /// Set the currency filter.
    #[must_use]
    pub fn with_ccy(mut self, ccy: impl Into<String>) -> Self {
        self.ccy = Some(ccy.into());
        self
    }

    /// Derive the topic key for this argument.
    #[must_use]
    pub fn key(&self) -> TopicKey {
        TopicKey::derive(self)
    }
}

// =============================================================================
// Topic Key
// =============================================================================

/// Deterministic identifier for one logical stream.
///
/// The channel comes first, then the instrument ID, then every other scoping
/// field as `name=value`, all separated by `:`. Separators and the escape
/// character inside values are backslash-escaped, so the encoding is
/// injective: distinct arguments never share a key.
///
/// ```rust
/// use venue_stream_client::Arg;
///
/// let key = Arg::instrument("trades", "BTC-USDT").key();
/// assert_eq!(key.as_str(), "trades:BTC-USDT");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    fn derive(arg: &Arg) -> Self {
        let mut key = String::with_capacity(arg.channel.len() + 32);
        push_escaped(&mut key, &arg.channel);

        if let Some(inst_id) = &arg.inst_id {
            key.push(':');
            push_escaped(&mut key, inst_id);
        }

        let named = [
            ("instType", &arg.inst_type),
            ("instFamily", &arg.inst_family),
            ("ccy", &arg.ccy),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                key.push(':');
                key.push_str(name);
                key.push('=');
                push_escaped(&mut key, value);
            }
        }

        Self(key)
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Arg> for TopicKey {
    fn from(arg: &Arg) -> Self {
        Self::derive(arg)
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

// =============================================================================
// Watch Key
// =============================================================================

/// Key under which a frame handler is registered.
///
/// Topic handlers and event handlers live in separate namespaces of the same
/// registry, so the two lookups made for each frame can never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    /// Handler for pushes on one subscribed stream.
    Topic(TopicKey),
    /// Handler for frames carrying a given `event` name.
    Event(String),
}

impl WatchKey {
    /// Watch key for a subscription argument.
    #[must_use]
    pub fn topic(arg: &Arg) -> Self {
        Self::Topic(arg.key())
    }

    /// Watch key for an event name.
    #[must_use]
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(key) => write!(f, "topic:{key}"),
            Self::Event(name) => write!(f, "event:{name}"),
        }
    }
}
