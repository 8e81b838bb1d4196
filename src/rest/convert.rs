use std::collections::HashMap;

use rust_decimal::Decimal;
use serde_json::Value;

use super::entities::{QuotesBody, StatusBody};
use crate::model::{Limits, Order, Ticker};

/// Decoded `GET status`, with unpriced quotes already dropped.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub quotes: HashMap<Ticker, Decimal>,
    pub orders: Vec<Order>,
    pub owned_stock: HashMap<Ticker, Decimal>,
    pub alerts: HashMap<Ticker, Limits>,
}

impl From<StatusBody> for Snapshot {
    fn from(body: StatusBody) -> Self {
        let StatusBody { quotes, orders, owned_stock, alerts } = body;
        Self { quotes: priced(quotes), orders, owned_stock, alerts }
    }
}

pub fn snapshot(body: Value) -> Result<Snapshot, serde_json::Error> {
    Ok(serde_json::from_value::<StatusBody>(body)?.into())
}

pub fn quotes(body: Value) -> Result<HashMap<Ticker, Decimal>, serde_json::Error> {
    Ok(priced(serde_json::from_value::<QuotesBody>(body)?))
}

fn priced(raw: QuotesBody) -> HashMap<Ticker, Decimal> {
    raw.into_iter()
        .filter_map(|(ticker, price)| match price {
            Some(price) => Some((ticker, price)),
            None => {
                log::debug!("no price yet for {}, skipped", ticker);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_quotes() {
        let q = quotes(json!({"PETR4": 10.5, "VALE3": 80, "NEW3": null})).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q["VALE3"], dec!(80));
        assert!(quotes(json!(["PETR4"])).is_err());
        assert!(quotes(json!({"PETR4": "ten"})).is_err());
    }

    #[test]
    fn test_snapshot() {
        let s = snapshot(json!({"quotes": {"PETR4": 10.5}, "orders": [], "owned_stock": {}, "alerts": {}})).unwrap();
        assert_eq!(s.quotes, [("PETR4".to_owned(), dec!(10.5))].into());
        assert!(s.orders.is_empty());
        assert!(snapshot(json!({"quotes": {}})).is_err());
    }
}
