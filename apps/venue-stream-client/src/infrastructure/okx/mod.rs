//! OKX v5 Protocol
//!
//! Wire types, the JSON codec, login signing and typed channel helpers for
//! the OKX v5 WebSocket API.

pub mod auth;
pub mod channels;
pub mod codec;
pub mod messages;

pub use auth::OkxCredentials;
pub use channels::CandleBar;
pub use codec::{DecodeError, EncodeError, JsonCodec};
pub use messages::{
    Balance, BalanceDetail, Candle, Directive, InboundFrame, MarkPrice, Op, Order, Position, Push,
    Side, Ticker, Trade,
};
