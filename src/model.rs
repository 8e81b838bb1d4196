use std::collections::HashMap;

use async_channel::{Receiver, RecvError, SendError, Sender};
use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub type Ticker = String;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Hash, Eq, PartialEq, strum::Display)]
pub enum Side {
    #[serde(rename = "BuyOrder")]
    #[strum(serialize = "BUY")]
    Buy,
    #[serde(rename = "SellOrder")]
    #[strum(serialize = "SELL")]
    Sell,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub client_name: String,
    #[serde(rename = "type")]
    pub side: Side,
    pub ticker: Ticker,
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(with = "wire_time")]
    pub expiry_date: NaiveDateTime,
    pub active: bool,
}

impl Order {
    pub fn new(client_name: String, side: Side, ticker: Ticker, amount: Decimal, price: Decimal, expiry_date: NaiveDateTime) -> Self {
        Self { client_name, side, ticker, amount, price, expiry_date, active: true }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub ticker: Ticker,
    pub seller_name: String,
    pub buyer_name: String,
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(with = "wire_time")]
    pub datetime: NaiveDateTime,
}

/// Alert bounds. On the wire (status reply) they travel as `[lower, upper]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct Limits {
    pub lower: Decimal,
    pub upper: Decimal,
}

impl From<(Decimal, Decimal)> for Limits {
    fn from((lower, upper): (Decimal, Decimal)) -> Self {
        Self { lower, upper }
    }
}

impl From<Limits> for (Decimal, Decimal) {
    fn from(l: Limits) -> Self {
        (l.lower, l.upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Holding {
    pub amount: Decimal,
    pub value: Decimal,
}

/// Identifies one optimistic mutation so its completion can undo exactly that mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pending(u64);

#[derive(Debug, Default)]
pub struct Pendings {
    last: u64,
}

impl Pendings {
    pub fn issue(&mut self) -> Pending {
        self.last += 1;
        Pending(self.last)
    }
}

#[derive(Debug, Clone)]
struct ActiveOrder {
    order: Order,
    pending: Option<Pending>,
}

#[derive(Debug, Clone)]
struct Alert {
    limits: Limits,
    pending: Option<Pending>,
}

/// Local copy of everything the server owns for this client.
#[derive(Default, Debug)]
pub struct Mirror {
    quotes: HashMap<Ticker, Decimal>,
    owned: HashMap<Ticker, Holding>,
    orders: Vec<ActiveOrder>,
    alerts: HashMap<Ticker, Alert>,
}

/// Point-in-time copy of a [`Mirror`], pending entries included.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    pub quotes: HashMap<Ticker, Decimal>,
    pub owned: HashMap<Ticker, Holding>,
    pub orders: Vec<Order>,
    pub alerts: HashMap<Ticker, Limits>,
}

impl Mirror {
    pub fn view(&self) -> View {
        View {
            quotes: self.quotes.clone(),
            owned: self.owned.clone(),
            orders: self.orders(),
            alerts: self.alerts(),
        }
    }

    pub fn quotes(&self) -> &HashMap<Ticker, Decimal> {
        &self.quotes
    }

    pub fn owned(&self) -> &HashMap<Ticker, Holding> {
        &self.owned
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.iter().map(|o| o.order.clone()).collect()
    }

    pub fn alerts(&self) -> HashMap<Ticker, Limits> {
        self.alerts.iter().map(|(t, a)| (t.clone(), a.limits)).collect()
    }

    pub fn replace_quotes(&mut self, quotes: HashMap<Ticker, Decimal>) {
        self.quotes = quotes;
        self.revalue();
    }

    pub fn merge_quotes(&mut self, quotes: HashMap<Ticker, Decimal>) {
        self.quotes.extend(quotes);
        self.revalue();
    }

    pub fn remove_quote(&mut self, ticker: &str) -> bool {
        let removed = self.quotes.remove(ticker).is_some();
        self.revalue();
        removed
    }

    pub fn replace_owned(&mut self, amounts: HashMap<Ticker, Decimal>) {
        self.owned = HashMap::with_capacity(amounts.len());
        self.merge_owned(amounts);
    }

    pub fn merge_owned(&mut self, amounts: HashMap<Ticker, Decimal>) {
        for (ticker, amount) in amounts {
            let value = self.value_of(&ticker, amount);
            self.owned.insert(ticker, Holding { amount, value });
        }
    }

    fn value_of(&self, ticker: &str, amount: Decimal) -> Decimal {
        self.quotes.get(ticker).map(|q| q * amount).unwrap_or_default()
    }

    fn revalue(&mut self) {
        let quotes = &self.quotes;
        for (ticker, holding) in self.owned.iter_mut() {
            holding.value = quotes.get(ticker).map(|q| q * holding.amount).unwrap_or_default();
        }
    }

    pub fn push_order(&mut self, pending: Pending, order: Order) {
        self.orders.push(ActiveOrder { order, pending: Some(pending) });
    }

    pub fn commit_order(&mut self, pending: Pending) -> bool {
        match self.orders.iter_mut().find(|o| o.pending == Some(pending)) {
            Some(o) => {
                o.pending = None;
                true
            }
            None => false,
        }
    }

    /// Drops the order inserted under `pending`. A wholesale replacement may already have
    /// dropped it, in which case nothing else is touched.
    pub fn rollback_order(&mut self, pending: Pending) -> Option<Order> {
        let idx = self.orders.iter().position(|o| o.pending == Some(pending))?;
        Some(self.orders.remove(idx).order)
    }

    pub fn replace_orders(&mut self, orders: Vec<Order>) {
        self.orders = orders.into_iter().map(|order| ActiveOrder { order, pending: None }).collect();
    }

    pub fn append_orders(&mut self, orders: Vec<Order>) {
        self.orders.extend(orders.into_iter().map(|order| ActiveOrder { order, pending: None }));
    }

    pub fn insert_alert(&mut self, pending: Pending, ticker: Ticker, limits: Limits) {
        self.alerts.insert(ticker, Alert { limits, pending: Some(pending) });
    }

    pub fn commit_alert(&mut self, pending: Pending, ticker: &str) {
        if let Some(alert) = self.alerts.get_mut(ticker) {
            if alert.pending == Some(pending) {
                alert.pending = None;
            }
        }
    }

    /// Removes the ticker's alert unless a later submission for the same ticker is still
    /// waiting for its own answer.
    pub fn rollback_alert(&mut self, pending: Pending, ticker: &str) -> bool {
        match self.alerts.get(ticker) {
            Some(Alert { pending: Some(other), .. }) if *other != pending => false,
            Some(_) => self.alerts.remove(ticker).is_some(),
            None => false,
        }
    }

    pub fn merge_alerts(&mut self, alerts: HashMap<Ticker, Limits>) {
        for (ticker, limits) in alerts {
            self.alerts.insert(ticker, Alert { limits, pending: None });
        }
    }

    pub fn remove_alert(&mut self, ticker: &str) -> bool {
        self.alerts.remove(ticker).is_some()
    }
}

/// Money and quantities are always shown with two decimals.
pub fn two_places(value: Decimal) -> String {
    format!("{:.2}", value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT)
}

mod wire_time {
    use chrono::{Local, NaiveDateTime, TimeZone};
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::DATETIME_FORMAT;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Epoch(i64),
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        serializer.serialize_str(&value.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where D: Deserializer<'de> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => super::parse_datetime(&s).map_err(serde::de::Error::custom),
            // legacy protocol: epoch seconds
            Raw::Epoch(secs) => Local
                .timestamp_opt(secs, 0)
                .single()
                .map(|dt| dt.naive_local())
                .ok_or_else(|| serde::de::Error::custom(format!("epoch out of range: {}", secs))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("service channel is closed")]
pub struct ChannelStopped;

impl<T> From<SendError<T>> for ChannelStopped {
    fn from(_: SendError<T>) -> Self {
        ChannelStopped
    }
}

impl From<RecvError> for ChannelStopped {
    fn from(_: RecvError) -> Self {
        ChannelStopped
    }
}

/// Both ends of a service: requests go in, responses come out.
pub struct ServiceHandle<Req, Res> {
    sender: Sender<Req>,
    receiver: Receiver<Res>,
}

impl<Req, Res> ServiceHandle<Req, Res> {
    pub fn new(sender: Sender<Req>, receiver: Receiver<Res>) -> Self {
        Self { sender, receiver }
    }

    pub async fn send(&self, request: Req) -> Result<(), ChannelStopped> {
        Ok(self.sender.send(request).await?)
    }

    pub async fn recv(&self) -> Result<Res, ChannelStopped> {
        Ok(self.receiver.recv().await?)
    }

    pub fn receiver(&self) -> Receiver<Res> {
        self.receiver.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<Req, Res> Clone for ServiceHandle<Req, Res> {
    fn clone(&self) -> Self {
        Self { sender: self.sender.clone(), receiver: self.receiver.clone() }
    }
}
