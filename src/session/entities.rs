use std::collections::HashMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use super::status::ConnectionStatus;
use crate::model::{Holding, Limits, Order, Side, Ticker, View};

/// What the presentation layer asks of the session.
#[derive(Debug)]
pub enum Command {
    Login(String),
    AddStockToQuotes(Ticker),
    RemoveStockFromQuotes(Ticker),
    GetCurrentQuotes,
    CreateOrder {
        side: Side,
        ticker: Ticker,
        amount: Decimal,
        price: Decimal,
        expiry: NaiveDateTime,
    },
    AddQuoteAlert {
        ticker: Ticker,
        lower: Decimal,
        upper: Decimal,
    },
    GetState,
    Snapshot(oneshot::Sender<View>),
    Close,
}

/// What the session tells the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Status(ConnectionStatus),
    ShowMainView,
    CloseLoginView,
    LoginRejected,
    Quotes(HashMap<Ticker, Decimal>),
    OwnedStock(HashMap<Ticker, Holding>),
    Orders(Vec<Order>),
    Alerts(HashMap<Ticker, Limits>),
    RemoveQuote(Ticker),
    RemoveAlert(Ticker),
    ClearOrderInput,
    ClearAlertInput,
    Message { text: String, error: bool },
    Teardown,
    Fatal(String),
}

impl Notification {
    pub fn info(text: String) -> Self {
        Notification::Message { text, error: false }
    }

    pub fn error(text: String) -> Self {
        Notification::Message { text, error: true }
    }
}
