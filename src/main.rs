mod model;
mod rest;
mod session;
mod streaming;

use std::time::Duration;

use clap::Parser;
use log::LevelFilter;
use rust_decimal::Decimal;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use thiserror::Error;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use model::{parse_datetime, two_places, Side, View};
use session::entities::{Command, Notification};
use session::{Session, SessionConf, SessionError, SessionHandle};

/// Console client for the homebroker server
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Server base URL
    #[arg(long, env = "HOMEBROKER_URL", default_value = "http://localhost:5000/")]
    url: String,
    /// Per-request timeout in seconds, none by default
    #[arg(long, env = "HOMEBROKER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
    /// Log in right away with this name
    #[arg(short, long, env = "HOMEBROKER_CLIENT_NAME")]
    name: Option<String>,
    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, env = "HOMEBROKER_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let level = args.log.parse().unwrap_or(LevelFilter::Info);
    if let Err(e) = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("logger is not available: {}", e);
    }

    let conf = SessionConf {
        base_url: args.url,
        request_timeout: args.timeout_secs.map(Duration::from_secs),
        ..Default::default()
    };
    let session = match Session::connect(&conf) {
        Ok(session) => session,
        Err(e) => {
            log::error!("cannot start the session: {}", e);
            std::process::exit(2);
        }
    };
    log::info!("homebroker client v{} talking to {}", env!("CARGO_PKG_VERSION"), conf.base_url);

    if let Some(name) = args.name {
        if let Err(e) = session.login(name).await {
            log::error!("login failed: {}", e);
        }
    } else {
        println!("Type `login <name>` to start.");
    }

    let printer = tokio::spawn(print_notifications(session.notifications()));
    tokio::spawn(read_commands(session));
    let code = printer.await.unwrap_or(1);
    std::process::exit(code);
}

/// Prints until the session ends; returns the process exit code.
async fn print_notifications(notifications: async_channel::Receiver<Notification>) -> i32 {
    while let Ok(notification) = notifications.recv().await {
        match notification {
            Notification::Teardown => {
                println!("Bye.");
                return 0;
            }
            Notification::Fatal(reason) => {
                eprintln!("fatal: {}", reason);
                return 1;
            }
            Notification::Message { text, error: true } => eprintln!("error: {}", text),
            other => {
                if let Some(text) = render(&other) {
                    println!("{}", text);
                }
            }
        }
    }
    log::error!("session ended without a teardown");
    1
}

async fn read_commands(session: SessionHandle) {
    let mut lines = BufReader::new(stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("cannot read the console: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if line.trim().eq_ignore_ascii_case("show") {
            match session.snapshot().await {
                Ok(view) => print_view(view),
                Err(e) => {
                    log::error!("session is gone: {}", e);
                    return;
                }
            }
            continue;
        }
        match parse_line(&line) {
            Ok(Command::Close) => break,
            Ok(command) => {
                if let Err(e) = dispatch(&session, command).await {
                    log::error!("session is gone: {}", e);
                    return;
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }
    if let Err(e) = session.close().await {
        log::error!("close failed: {}", e);
    }
}

fn print_view(view: View) {
    let View { quotes, owned, orders, alerts } = view;
    for notification in [
        Notification::Quotes(quotes),
        Notification::OwnedStock(owned),
        Notification::Orders(orders),
        Notification::Alerts(alerts),
    ] {
        if let Some(text) = render(&notification) {
            println!("{}", text);
        }
    }
}

async fn dispatch(session: &SessionHandle, command: Command) -> Result<(), SessionError> {
    match command {
        Command::Login(name) => session.login(name).await,
        Command::AddStockToQuotes(ticker) => session.add_stock_to_quotes(ticker).await,
        Command::RemoveStockFromQuotes(ticker) => session.remove_stock_from_quotes(ticker).await,
        Command::GetCurrentQuotes => session.get_current_quotes().await,
        Command::CreateOrder { side, ticker, amount, price, expiry } => {
            session.create_order(side, ticker, amount, price, expiry).await
        }
        Command::AddQuoteAlert { ticker, lower, upper } => session.add_quote_alert(ticker, lower, upper).await,
        Command::GetState => session.get_state().await,
        Command::Close => session.close().await,
        other => session.send(other).await,
    }
}

#[derive(Debug, Error, PartialEq)]
enum LineError {
    #[error("unknown command {0:?}; try login, add, remove, quotes, state, show, alert, buy, sell, close")]
    Unknown(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("{0:?} is not a number")]
    BadNumber(String),
    #[error("bad expiry date, expected YYYY-MM-DD HH:MM:SS")]
    BadExpiry,
}

fn parse_line(line: &str) -> Result<Command, LineError> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let mut next = |what: &'static str| words.next().map(str::to_owned).ok_or(LineError::Missing(what));
    let command = match verb.as_str() {
        "login" => Command::Login(next("name")?),
        "add" => Command::AddStockToQuotes(next("ticker")?.to_uppercase()),
        "remove" => Command::RemoveStockFromQuotes(next("ticker")?.to_uppercase()),
        "quotes" => Command::GetCurrentQuotes,
        "state" => Command::GetState,
        "alert" => Command::AddQuoteAlert {
            ticker: next("ticker")?.to_uppercase(),
            lower: number(next("lower limit")?)?,
            upper: number(next("upper limit")?)?,
        },
        "buy" | "sell" => {
            let side = if verb == "buy" { Side::Buy } else { Side::Sell };
            let ticker = next("ticker")?.to_uppercase();
            let amount = number(next("amount")?)?;
            let price = number(next("price")?)?;
            let expiry = format!("{} {}", next("expiry date")?, next("expiry time")?);
            let expiry = parse_datetime(&expiry).map_err(|_| LineError::BadExpiry)?;
            Command::CreateOrder { side, ticker, amount, price, expiry }
        }
        "close" | "quit" => Command::Close,
        _ => return Err(LineError::Unknown(verb.clone())),
    };
    Ok(command)
}

fn number(word: String) -> Result<Decimal, LineError> {
    word.parse().map_err(|_| LineError::BadNumber(word))
}

fn render(notification: &Notification) -> Option<String> {
    let text = match notification {
        Notification::ShowMainView => "Logged in.".to_owned(),
        Notification::LoginRejected => "Login refused, try another name.".to_owned(),
        Notification::Quotes(quotes) => {
            let mut lines: Vec<_> = quotes.iter().map(|(t, q)| format!("  {:<8} {:>10}", t, two_places(*q))).collect();
            lines.sort();
            format!("Quotes:\n{}", lines.join("\n"))
        }
        Notification::OwnedStock(owned) => {
            let mut lines: Vec<_> = owned
                .iter()
                .map(|(t, h)| format!("  {:<8} {:>8} {:>12}", t, two_places(h.amount), two_places(h.value)))
                .collect();
            lines.sort();
            format!("Portfolio:\n{}", lines.join("\n"))
        }
        Notification::Orders(orders) => {
            let lines: Vec<_> = orders
                .iter()
                .map(|o| {
                    format!(
                        "  {:<4} {:<8} {:>8} @ {:>10} until {}",
                        o.side,
                        o.ticker,
                        two_places(o.amount),
                        two_places(o.price),
                        o.expiry_date.format(model::DATETIME_FORMAT)
                    )
                })
                .collect();
            format!("Orders:\n{}", lines.join("\n"))
        }
        Notification::Alerts(alerts) => {
            let mut lines: Vec<_> = alerts
                .iter()
                .map(|(t, l)| format!("  {:<8} [{}, {}]", t, two_places(l.lower), two_places(l.upper)))
                .collect();
            lines.sort();
            format!("Alerts:\n{}", lines.join("\n"))
        }
        Notification::RemoveQuote(ticker) => format!("{} left the quotes.", ticker),
        Notification::RemoveAlert(ticker) => format!("Alert for {} removed.", ticker),
        Notification::Message { text, .. } => text.clone(),
        Notification::Status(status) => {
            log::debug!("status: {}", status);
            return None;
        }
        Notification::CloseLoginView
        | Notification::ClearOrderInput
        | Notification::ClearAlertInput
        | Notification::Teardown
        | Notification::Fatal(_) => return None,
    };
    Some(text)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Holding, Limits, Order};
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_line() {
        assert!(matches!(parse_line("login alice"), Ok(Command::Login(name)) if name == "alice"));
        assert!(matches!(parse_line("ADD petr4"), Ok(Command::AddStockToQuotes(t)) if t == "PETR4"));
        assert!(matches!(parse_line("quotes"), Ok(Command::GetCurrentQuotes)));
        match parse_line("sell vale3 10 80.5 2030-01-01 12:00:00") {
            Ok(Command::CreateOrder { side, ticker, amount, price, expiry }) => {
                assert_eq!(side, Side::Sell);
                assert_eq!(ticker, "VALE3");
                assert_eq!(amount, dec!(10));
                assert_eq!(price, dec!(80.5));
                assert_eq!(expiry, parse_datetime("2030-01-01 12:00:00").unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_line("alert itub4 20 30.25") {
            Ok(Command::AddQuoteAlert { ticker, lower, upper }) => {
                assert_eq!((ticker.as_str(), lower, upper), ("ITUB4", dec!(20), dec!(30.25)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_line_errors() {
        assert_eq!(parse_line("login").unwrap_err(), LineError::Missing("name"));
        assert_eq!(parse_line("dance").unwrap_err(), LineError::Unknown("dance".to_owned()));
        assert_eq!(parse_line("alert PETR4 ten 12").unwrap_err(), LineError::BadNumber("ten".to_owned()));
        assert_eq!(parse_line("buy PETR4 1 2 tomorrow noon").unwrap_err(), LineError::BadExpiry);
        assert_eq!(parse_line("buy PETR4 1 2").unwrap_err(), LineError::Missing("expiry date"));
    }

    #[test]
    fn test_render() {
        let alerts = [("PETR4".to_owned(), Limits { lower: dec!(9), upper: dec!(12.5) })].into();
        assert_eq!(render(&Notification::Alerts(alerts)).unwrap(), "Alerts:\n  PETR4    [9.00, 12.50]");
        assert_eq!(render(&Notification::ClearOrderInput), None);
        assert_eq!(render(&Notification::info("hi".to_owned())).unwrap(), "hi");
    }

    #[test]
    fn test_render_amounts() {
        let owned = [("VALE3".to_owned(), Holding { amount: dec!(10), value: dec!(805) })].into();
        let text = render(&Notification::OwnedStock(owned)).unwrap();
        assert!(text.contains(" 10.00 "), "{}", text);
        assert!(text.ends_with("805.00"), "{}", text);

        let expiry = parse_datetime("2030-01-01 12:00:00").unwrap();
        let order = Order::new("alice".to_owned(), Side::Buy, "PETR4".to_owned(), dec!(100), dec!(10.5), expiry);
        let text = render(&Notification::Orders(vec![order])).unwrap();
        assert!(text.contains(" 100.00 @ "), "{}", text);
        assert!(text.contains("10.50 until 2030-01-01 12:00:00"), "{}", text);
    }
}
