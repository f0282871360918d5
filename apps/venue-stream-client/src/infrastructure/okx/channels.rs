//! Typed Channels
//!
//! Convenience subscriptions for the OKX channels this crate models. Each
//! helper builds the channel argument and decodes pushes into the payload
//! types from [`messages`](super::messages).
//!
//! | Channel       | Service          | Payload      |
//! |---------------|------------------|--------------|
//! | `tickers`     | public           | [`Ticker`]    |
//! | `trades`      | public           | [`Trade`]     |
//! | `mark-price`  | public           | [`MarkPrice`] |
//! | `candle{bar}` | business         | [`Candle`]    |
//! | `account`     | private          | [`Balance`]   |
//! | `positions`   | private          | [`Position`]  |
//! | `orders`      | private          | [`Order`]     |

use std::fmt;

use tokio_util::sync::CancellationToken;

use super::messages::{Balance, Candle, MarkPrice, Order, Position, Push, Ticker, Trade};
use crate::domain::subscription::Arg;
use crate::infrastructure::stream::{StreamClient, StreamError};

/// Candlestick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleBar {
    /// 1 minute.
    Minute1,
    /// 5 minutes.
    Minute5,
    /// 15 minutes.
    Minute15,
    /// 1 hour.
    Hour1,
    /// 4 hours.
    Hour4,
    /// 1 day (UTC+8 open).
    Day1,
    /// 1 week.
    Week1,
}

impl CandleBar {
    /// Interval suffix used in the channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute1 => "1m",
            Self::Minute5 => "5m",
            Self::Minute15 => "15m",
            Self::Hour1 => "1H",
            Self::Hour4 => "4H",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
        }
    }

    /// Full channel name, e.g. `candle1m`.
    #[must_use]
    pub fn channel(self) -> String {
        format!("candle{}", self.as_str())
    }
}

impl fmt::Display for CandleBar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StreamClient {
    /// Stream `tickers` for one instrument.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn tickers<F>(
        &self,
        cancel: &CancellationToken,
        inst_id: &str,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Ticker>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::instrument("tickers", inst_id), handler)
            .await
    }

    /// Stream public `trades` for one instrument.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn trades<F>(
        &self,
        cancel: &CancellationToken,
        inst_id: &str,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Trade>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::instrument("trades", inst_id), handler)
            .await
    }

    /// Stream `mark-price` for one instrument.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn mark_price<F>(
        &self,
        cancel: &CancellationToken,
        inst_id: &str,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<MarkPrice>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::instrument("mark-price", inst_id), handler)
            .await
    }

    /// Stream candlesticks of `bar` for one instrument. Served by the
    /// business endpoint.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn candles<F>(
        &self,
        cancel: &CancellationToken,
        inst_id: &str,
        bar: CandleBar,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Candle>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::instrument(bar.channel(), inst_id), handler)
            .await
    }

    /// Stream account balances, optionally filtered to one currency.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn account<F>(
        &self,
        cancel: &CancellationToken,
        ccy: Option<&str>,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Balance>) + Send + Sync + 'static,
    {
        let arg = match ccy {
            Some(ccy) => Arg::new("account").with_ccy(ccy),
            None => Arg::new("account"),
        };
        self.subscribe_typed(cancel, arg, handler).await
    }

    /// Stream positions for an instrument type (`ANY` for all).
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn positions<F>(
        &self,
        cancel: &CancellationToken,
        inst_type: &str,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Position>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::new("positions").with_inst_type(inst_type), handler)
            .await
    }

    /// Stream order updates for an instrument type (`ANY` for all).
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn orders<F>(
        &self,
        cancel: &CancellationToken,
        inst_type: &str,
        handler: F,
    ) -> Result<(), StreamError>
    where
        F: Fn(Push<Order>) + Send + Sync + 'static,
    {
        self.subscribe_typed(cancel, Arg::new("orders").with_inst_type(inst_type), handler)
            .await
    }
}
