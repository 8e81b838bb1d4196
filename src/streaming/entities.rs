use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::model::{Order, Ticker, Transaction};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
pub enum Notice {
    Limit {
        ticker: Ticker,
        current_quote: Decimal,
    },
    Order(OrderNotice),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct OrderNotice {
    pub active_orders: Vec<Order>,
    pub expired_orders: Vec<Ticker>,
    pub owned_stock: HashMap<Ticker, Decimal>,
    pub transactions: Vec<Transaction>,
}

/// One decoded `data:` payload of the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Notice(Notice),
    /// Bare integer. As the first frame: `0` accepts the login, anything else refuses it.
    Status(i64),
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized payload {payload:?}: {reason}")]
pub struct DecodeError {
    pub payload: String,
    pub reason: serde_json::Error,
}

impl FromStr for Frame {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let notice_err = match serde_json::from_str::<Notice>(s) {
            Ok(notice) => return Ok(Frame::Notice(notice)),
            Err(e) => e,
        };
        match serde_json::from_str::<i64>(s.trim()) {
            Ok(code) => Ok(Frame::Status(code)),
            Err(_) => Err(DecodeError { payload: s.to_owned(), reason: notice_err }),
        }
    }
}

/// What the listener hands to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Frame(Frame),
    /// The login stream was answered with a 4xx.
    Refused(u16),
    /// Server unreachable or failing.
    Lost(String),
    Ended,
}
