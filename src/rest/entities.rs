use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{GatewayError, Rejection};
use crate::model::{Limits, Order, Pending, Ticker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Endpoint {
    Login,
    Quote,
    Order,
    Limit,
    Status,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Query(Vec<(&'static str, String)>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Quotes { client_name: String },
    AddQuote { client_name: String, ticker: Ticker },
    RemoveQuote { client_name: String, ticker: Ticker },
    CreateOrder(Pending, Order),
    AddAlert { pending: Pending, client_name: String, ticker: Ticker, limits: Limits },
    Status { client_name: String },
    Close { client_name: String },
}

impl Request {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Request::Quotes { .. } | Request::AddQuote { .. } | Request::RemoveQuote { .. } => Endpoint::Quote,
            Request::CreateOrder(..) => Endpoint::Order,
            Request::AddAlert { .. } => Endpoint::Limit,
            Request::Status { .. } => Endpoint::Status,
            Request::Close { .. } => Endpoint::Close,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Request::AddQuote { .. } | Request::CreateOrder(..) | Request::AddAlert { .. } => Method::Post,
            Request::RemoveQuote { .. } => Method::Delete,
            Request::Quotes { .. } | Request::Status { .. } | Request::Close { .. } => Method::Get,
        }
    }

    pub fn payload(&self) -> Payload {
        match self {
            Request::Quotes { client_name } | Request::Status { client_name } | Request::Close { client_name } => {
                Payload::Query(vec![("client_name", client_name.clone())])
            }
            Request::RemoveQuote { client_name, ticker } => {
                Payload::Query(vec![("client_name", client_name.clone()), ("ticker", ticker.clone())])
            }
            Request::AddQuote { client_name, ticker } => Payload::Json(json!({
                "client_name": client_name,
                "ticker": ticker,
            })),
            Request::CreateOrder(_, order) => Payload::Json(json!(order)),
            Request::AddAlert { client_name, ticker, limits, .. } => Payload::Json(json!({
                "client_name": client_name,
                "ticker": ticker,
                "lower_limit": limits.lower,
                "upper_limit": limits.upper,
            })),
        }
    }

    pub fn expects_body(&self) -> bool {
        matches!(self, Request::Quotes { .. } | Request::Status { .. })
    }

    /// What a non-200, non-5xx status means for this particular request.
    pub fn rejection(&self, status: u16) -> Rejection {
        match (self, status) {
            (Request::CreateOrder(..), 400) => Rejection::ExpiredOrder,
            (Request::CreateOrder(..), 403) => Rejection::NotEnoughStock,
            (Request::RemoveQuote { .. }, 404) => Rejection::NotWatched,
            (Request::Quotes { .. }, 404) | (Request::Status { .. }, 404) | (Request::Close { .. }, 404) => {
                Rejection::UnknownClient
            }
            (_, 404) => Rejection::UnknownTicker,
            (_, 400) => Rejection::InvalidMessage,
            (_, status) => Rejection::Unexpected(status),
        }
    }
}

#[derive(Debug)]
pub enum Response {
    Done(Request, Option<Value>),
    Rejected(Request, Rejection),
    Err(Request, GatewayError),
}

/// Body of `GET status`.
#[derive(Deserialize, Debug)]
pub struct StatusBody {
    pub quotes: HashMap<Ticker, Option<Decimal>>,
    pub orders: Vec<Order>,
    pub owned_stock: HashMap<Ticker, Decimal>,
    pub alerts: HashMap<Ticker, Limits>,
}

/// Body of `GET quote`. The server reports `null` for a ticker it has not priced yet.
pub type QuotesBody = HashMap<Ticker, Option<Decimal>>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{parse_datetime, Pendings, Side};
    use rust_decimal_macros::dec;

    #[test]
    fn test_routes() {
        let client_name = "alice".to_owned();
        let ticker = "PETR4".to_owned();
        let remove = Request::RemoveQuote { client_name: client_name.clone(), ticker: ticker.clone() };
        assert_eq!((remove.endpoint(), remove.method()), (Endpoint::Quote, Method::Delete));
        assert_eq!(
            remove.payload(),
            Payload::Query(vec![("client_name", "alice".to_owned()), ("ticker", "PETR4".to_owned())])
        );
        assert!(!remove.expects_body());

        let status = Request::Status { client_name: client_name.clone() };
        assert_eq!(status.endpoint().to_string(), "status");
        assert_eq!(status.method().to_string(), "GET");
        assert!(status.expects_body());

        let alert = Request::AddAlert {
            pending: Pendings::default().issue(),
            client_name,
            ticker,
            limits: Limits { lower: dec!(10), upper: dec!(20) },
        };
        match alert.payload() {
            Payload::Json(v) => {
                assert_eq!(v["lower_limit"], 10.0);
                assert_eq!(v["upper_limit"], 20.0);
                assert_eq!(v["client_name"], "alice");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_rejections() {
        let expiry = parse_datetime("2030-01-01 00:00:00").unwrap();
        let order = Order::new("alice".to_owned(), Side::Sell, "VALE3".to_owned(), dec!(1), dec!(80), expiry);
        let create = Request::CreateOrder(Pendings::default().issue(), order);
        assert_eq!(create.rejection(400), Rejection::ExpiredOrder);
        assert_eq!(create.rejection(403), Rejection::NotEnoughStock);
        assert_eq!(create.rejection(404), Rejection::UnknownTicker);
        assert_eq!(create.rejection(409), Rejection::Unexpected(409));

        let add = Request::AddQuote { client_name: "alice".to_owned(), ticker: "XXXX".to_owned() };
        assert_eq!(add.rejection(404), Rejection::UnknownTicker);
        assert_eq!(add.rejection(400), Rejection::InvalidMessage);
    }

    #[test]
    fn test_status_body() {
        let data = r#"{
            "quotes": {"PETR4": 10.5, "NEW3": null},
            "orders": [{"client_name": "alice", "type": "BuyOrder", "ticker": "PETR4",
                        "amount": 100, "price": 10.0, "expiry_date": "2030-01-01 12:00:00", "active": true}],
            "owned_stock": {"PETR4": 300},
            "alerts": {"PETR4": [9, 12]}
        }"#;
        let body: StatusBody = serde_json::from_str(data).unwrap();
        assert_eq!(body.quotes["PETR4"], Some(dec!(10.5)));
        assert_eq!(body.quotes["NEW3"], None);
        assert_eq!(body.orders[0].side, Side::Buy);
        assert_eq!(body.owned_stock["PETR4"], dec!(300));
        assert_eq!(body.alerts["PETR4"], Limits { lower: dec!(9), upper: dec!(12) });
    }
}
