pub mod entities;
pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::model::*;
use crate::rest::convert::{self, Snapshot};
use crate::rest::entities::{Request as RestRequest, Response as RestResponse};
use crate::rest::error::{GatewayError, Rejection};
use crate::rest::{Gateway, HttpGateway, Rest};
use crate::streaming::entities::{Event, Frame, Notice, OrderNotice};
use crate::streaming::{EventSource, Streaming};
use entities::*;
use status::{ConnectionStatus, StatusError};

#[derive(Debug, Clone)]
pub struct SessionConf {
    pub base_url: String,
    pub request_timeout: Option<Duration>,
    pub close_poll_interval: Duration,
}

impl Default for SessionConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/".to_owned(),
            request_timeout: None,
            close_poll_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Stopped(#[from] ChannelStopped),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("session aborted: {0}")]
    Fatal(String),
}

/// Owns the mirror and the connection status. Commands, push events and REST replies are
/// all handled on this one task, one at a time.
pub struct Session {
    sender: Sender<Notification>,
    receiver: Receiver<Command>,
    rest: ServiceHandle<RestRequest, RestResponse>,
    events: Receiver<Event>,
    events_sender: Sender<Event>,
    source: Arc<dyn EventSource>,
    listener: Option<JoinHandle<()>>,
    status: ConnectionStatus,
    client_name: String,
    mirror: Mirror,
    pendings: Pendings,
    closed: Arc<AtomicBool>,
    finished: bool,
}

impl Session {
    pub fn connect(conf: &SessionConf) -> Result<SessionHandle, GatewayError> {
        let gateway = HttpGateway::new(conf.base_url.clone(), conf.request_timeout)?;
        let source = Streaming::new(&conf.base_url)?;
        Ok(Self::start(conf, Arc::new(gateway), Arc::new(source)))
    }

    pub fn start(conf: &SessionConf, gateway: Arc<dyn Gateway>, source: Arc<dyn EventSource>) -> SessionHandle {
        let (sender, r) = async_channel::bounded(1000);
        let (s, receiver) = async_channel::bounded(1000);
        let (events_sender, events) = async_channel::bounded(1000);
        let closed = Arc::new(AtomicBool::new(false));
        let session = Self {
            sender,
            receiver,
            rest: Rest::start(gateway),
            events,
            events_sender,
            source,
            listener: None,
            status: ConnectionStatus::default(),
            client_name: String::new(),
            mirror: Mirror::default(),
            pendings: Pendings::default(),
            closed: closed.clone(),
            finished: false,
        };
        tokio::spawn(async move {
            match session.run().await {
                Ok(()) => log::info!("Session finished"),
                Err(e) => log::error!("Session stopped: {}", e),
            }
        });

        SessionHandle { service: ServiceHandle::new(s, r), closed, poll_interval: conf.close_poll_interval }
    }

    async fn run(mut self) -> Result<(), SessionError> {
        log::info!("Session started");
        while !self.finished {
            tokio::select! {
                event = self.events.recv() => {
                    let event = event.map_err(ChannelStopped::from)?;
                    self.on_event(event).await?;
                }
                response = self.rest.recv() => {
                    self.on_response(response?).await?;
                }
                command = self.receiver.recv() => {
                    let command = command.map_err(|_| ChannelStopped)?;
                    self.on_command(command).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::Snapshot(reply) => {
                let _ = reply.send(self.mirror.view());
                return Ok(());
            }
            command if self.status.is_closed() => {
                log::warn!("session is closed, ignoring {:?}", command);
                return Ok(());
            }
            Command::Login(client_name) => self.login(client_name),
            Command::Close => self.close().await?,
            command if self.status == ConnectionStatus::Waiting => {
                log::warn!("not logged in, ignoring {:?}", command);
            }
            Command::AddStockToQuotes(ticker) => {
                let client_name = self.client_name.clone();
                self.request(RestRequest::AddQuote { client_name, ticker }).await?;
            }
            Command::RemoveStockFromQuotes(ticker) => {
                let client_name = self.client_name.clone();
                self.request(RestRequest::RemoveQuote { client_name, ticker }).await?;
            }
            Command::GetCurrentQuotes => self.refresh_quotes().await?,
            Command::CreateOrder { side, ticker, amount, price, expiry } => {
                let order = Order::new(self.client_name.clone(), side, ticker, amount, price, expiry);
                let pending = self.pendings.issue();
                self.mirror.push_order(pending, order.clone());
                self.request(RestRequest::CreateOrder(pending, order)).await?;
            }
            Command::AddQuoteAlert { ticker, lower, upper } => {
                let limits = Limits { lower, upper };
                let pending = self.pendings.issue();
                self.mirror.insert_alert(pending, ticker.clone(), limits);
                let client_name = self.client_name.clone();
                self.request(RestRequest::AddAlert { pending, client_name, ticker, limits }).await?;
            }
            Command::GetState => {
                let client_name = self.client_name.clone();
                self.request(RestRequest::Status { client_name }).await?;
            }
        }
        Ok(())
    }

    fn login(&mut self, client_name: String) {
        if self.status != ConnectionStatus::Waiting {
            log::warn!("already logged in as {}, ignoring login of {}", self.client_name, client_name);
            return;
        }
        if let Some(old) = self.listener.take() {
            log::info!("dropping the event stream of {}", self.client_name);
            old.abort();
        }
        log::info!("logging in as {}", client_name);
        self.client_name = client_name;
        self.listener = Some(self.source.listen(&self.client_name, self.events_sender.clone()));
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let was = self.status;
        self.status.close()?;
        self.notify(Notification::Status(self.status)).await?;
        if was == ConnectionStatus::Waiting {
            self.finish().await
        } else {
            let client_name = self.client_name.clone();
            Ok(self.request(RestRequest::Close { client_name }).await?)
        }
    }

    async fn finish(&mut self) -> Result<(), SessionError> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.notify(Notification::Teardown).await?;
        self.closed.store(true, Ordering::SeqCst);
        self.finished = true;
        Ok(())
    }

    async fn fatal(&mut self, reason: String) -> Result<(), SessionError> {
        log::error!("{}", reason);
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.notify(Notification::Fatal(reason.clone())).await?;
        Err(SessionError::Fatal(reason))
    }

    async fn on_event(&mut self, event: Event) -> Result<(), SessionError> {
        if self.status.is_closed() {
            log::debug!("session is closed, dropping {:?}", event);
            return Ok(());
        }
        match event {
            Event::Frame(Frame::Status(code)) => self.on_login_status(code).await?,
            Event::Frame(Frame::Notice(Notice::Limit { ticker, current_quote })) => {
                self.notify_limit(ticker, current_quote).await?
            }
            Event::Frame(Frame::Notice(Notice::Order(notice))) => self.notify_order(notice).await?,
            Event::Refused(code) if self.status == ConnectionStatus::Waiting => {
                log::warn!("login of {} refused with {}", self.client_name, code);
                self.notify(Notification::LoginRejected).await?;
            }
            Event::Refused(code) => log::warn!("event stream refused with {}", code),
            Event::Lost(reason) => self.fatal(format!("event stream lost: {}", reason)).await?,
            Event::Ended => log::info!("event stream ended"),
        }
        Ok(())
    }

    async fn on_login_status(&mut self, code: i64) -> Result<(), SessionError> {
        match (self.status, code) {
            (ConnectionStatus::Waiting, 0) => {
                self.status.accept_login()?;
                log::info!("logged in as {}", self.client_name);
                self.notify(Notification::Status(self.status)).await?;
                self.notify(Notification::ShowMainView).await?;
                self.notify(Notification::CloseLoginView).await?;
                let client_name = self.client_name.clone();
                self.request(RestRequest::Status { client_name }).await?;
            }
            (ConnectionStatus::Waiting, code) => {
                log::warn!("login of {} refused ({})", self.client_name, code);
                self.notify(Notification::LoginRejected).await?;
            }
            (_, code) => log::info!("server is ending the event stream ({})", code),
        }
        Ok(())
    }

    async fn notify_limit(&mut self, ticker: Ticker, current_quote: Decimal) -> Result<(), ChannelStopped> {
        if !self.mirror.remove_alert(&ticker) {
            log::debug!("limit reached for {} without a local alert", ticker);
        }
        self.notify(Notification::RemoveAlert(ticker.clone())).await?;
        let text = format!("Limit reached for \"{}\". Current price: {}", ticker, two_places(current_quote));
        self.notify(Notification::info(text)).await
    }

    async fn notify_order(&mut self, notice: OrderNotice) -> Result<(), ChannelStopped> {
        let OrderNotice { active_orders, expired_orders, owned_stock, transactions } = notice;
        self.refresh_quotes().await?;

        self.mirror.replace_orders(active_orders);
        self.notify(Notification::Orders(self.mirror.orders())).await?;
        for ticker in expired_orders {
            self.notify(Notification::info(format!("An order for \"{}\" expired.", ticker))).await?;
        }

        self.mirror.replace_owned(owned_stock);
        self.notify(Notification::OwnedStock(self.mirror.owned().clone())).await?;
        for t in transactions {
            let role = if t.seller_name == self.client_name { "Sold" } else { "Bought" };
            let text = format!(
                "Transaction executed: {} {} shares of \"{}\" for {} each at {}",
                role,
                two_places(t.amount),
                t.ticker,
                two_places(t.price),
                t.datetime.format(DATETIME_FORMAT)
            );
            self.notify(Notification::info(text)).await?;
        }
        Ok(())
    }

    async fn on_response(&mut self, response: RestResponse) -> Result<(), SessionError> {
        match response {
            RestResponse::Done(request, body) => self.on_done(request, body).await,
            RestResponse::Rejected(request, rejection) => self.on_rejected(request, rejection).await,
            RestResponse::Err(request, e) if e.is_fatal() => {
                self.fatal(format!("{} {} failed: {}", request.method(), request.endpoint(), e)).await
            }
            RestResponse::Err(request, e) => {
                log::error!("dropping reply to {} {}: {}", request.method(), request.endpoint(), e);
                Ok(())
            }
        }
    }

    async fn on_done(&mut self, request: RestRequest, body: Option<Value>) -> Result<(), SessionError> {
        match request {
            RestRequest::Quotes { .. } => match body.map(convert::quotes) {
                Some(Ok(quotes)) => {
                    self.mirror.replace_quotes(quotes);
                    self.notify(Notification::Quotes(self.mirror.quotes().clone())).await?;
                    self.notify(Notification::OwnedStock(self.mirror.owned().clone())).await?;
                }
                Some(Err(e)) => log::error!("unreadable quote reply: {}", e),
                None => log::error!("quote reply without a body"),
            },
            RestRequest::AddQuote { ticker, .. } => {
                log::info!("{} added to quotes", ticker);
                self.refresh_quotes().await?;
            }
            RestRequest::RemoveQuote { ticker, .. } => {
                self.mirror.remove_quote(&ticker);
                self.notify(Notification::RemoveQuote(ticker)).await?;
                self.refresh_quotes().await?;
            }
            RestRequest::CreateOrder(pending, order) => {
                if !self.mirror.commit_order(pending) {
                    log::debug!("order for {} was already replaced by the server's list", order.ticker);
                }
                self.notify(Notification::ClearOrderInput).await?;
                self.notify(Notification::Orders(self.mirror.orders())).await?;
            }
            RestRequest::AddAlert { pending, ticker, .. } => {
                self.mirror.commit_alert(pending, &ticker);
                self.notify(Notification::ClearAlertInput).await?;
                self.notify(Notification::Alerts(self.mirror.alerts())).await?;
            }
            RestRequest::Status { .. } => match body.map(convert::snapshot) {
                Some(Ok(snapshot)) => self.merge_snapshot(snapshot).await?,
                Some(Err(e)) => log::error!("unreadable status reply: {}", e),
                None => log::error!("status reply without a body"),
            },
            RestRequest::Close { .. } => self.finish().await?,
        }
        Ok(())
    }

    async fn on_rejected(&mut self, request: RestRequest, rejection: Rejection) -> Result<(), SessionError> {
        let text = match request {
            RestRequest::Quotes { .. } => format!("Could not fetch quotes: {}", rejection),
            RestRequest::AddQuote { ticker, .. } => format!("Could not add \"{}\" to quotes: {}", ticker, rejection),
            RestRequest::RemoveQuote { ticker, .. } => {
                format!("Could not remove \"{}\" from quotes: {}", ticker, rejection)
            }
            RestRequest::CreateOrder(pending, order) => {
                self.mirror.rollback_order(pending);
                format!("Could not create the order for \"{}\": {}", order.ticker, rejection)
            }
            RestRequest::AddAlert { pending, ticker, .. } => {
                self.mirror.rollback_alert(pending, &ticker);
                format!("Could not create the alert for \"{}\": {}", ticker, rejection)
            }
            RestRequest::Status { .. } => {
                log::error!("status refused: {}", rejection);
                return Ok(());
            }
            RestRequest::Close { .. } => {
                log::warn!("close refused: {}", rejection);
                return self.finish().await;
            }
        };
        Ok(self.report(text).await?)
    }

    async fn merge_snapshot(&mut self, snapshot: Snapshot) -> Result<(), ChannelStopped> {
        let Snapshot { quotes, orders, owned_stock, alerts } = snapshot;
        self.mirror.merge_quotes(quotes);
        self.mirror.append_orders(orders);
        self.mirror.merge_owned(owned_stock);
        self.mirror.merge_alerts(alerts);
        self.notify(Notification::Quotes(self.mirror.quotes().clone())).await?;
        self.notify(Notification::Orders(self.mirror.orders())).await?;
        self.notify(Notification::OwnedStock(self.mirror.owned().clone())).await?;
        self.notify(Notification::Alerts(self.mirror.alerts())).await
    }

    async fn refresh_quotes(&self) -> Result<(), ChannelStopped> {
        let client_name = self.client_name.clone();
        self.request(RestRequest::Quotes { client_name }).await
    }

    async fn request(&self, request: RestRequest) -> Result<(), ChannelStopped> {
        if self.status.is_closed() && !matches!(request, RestRequest::Close { .. }) {
            log::debug!("session is closed, not sending {} {}", request.method(), request.endpoint());
            return Ok(());
        }
        self.rest.send(request).await
    }

    async fn report(&self, text: String) -> Result<(), ChannelStopped> {
        log::warn!("{}", text);
        self.notify(Notification::error(text)).await
    }

    async fn notify(&self, notification: Notification) -> Result<(), ChannelStopped> {
        Ok(self.sender.send(notification).await?)
    }
}

/// Presentation side of a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    service: ServiceHandle<Command, Notification>,
    closed: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl SessionHandle {
    pub fn notifications(&self) -> Receiver<Notification> {
        self.service.receiver()
    }

    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        Ok(self.service.send(command).await?)
    }

    pub async fn login(&self, client_name: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::Login(client_name.into())).await
    }

    pub async fn add_stock_to_quotes(&self, ticker: impl Into<Ticker>) -> Result<(), SessionError> {
        self.send(Command::AddStockToQuotes(ticker.into())).await
    }

    pub async fn remove_stock_from_quotes(&self, ticker: impl Into<Ticker>) -> Result<(), SessionError> {
        self.send(Command::RemoveStockFromQuotes(ticker.into())).await
    }

    pub async fn get_current_quotes(&self) -> Result<(), SessionError> {
        self.send(Command::GetCurrentQuotes).await
    }

    pub async fn create_order(
        &self,
        side: Side,
        ticker: impl Into<Ticker>,
        amount: Decimal,
        price: Decimal,
        expiry: NaiveDateTime,
    ) -> Result<(), SessionError> {
        self.send(Command::CreateOrder { side, ticker: ticker.into(), amount, price, expiry }).await
    }

    pub async fn add_quote_alert(&self, ticker: impl Into<Ticker>, lower: Decimal, upper: Decimal) -> Result<(), SessionError> {
        self.send(Command::AddQuoteAlert { ticker: ticker.into(), lower, upper }).await
    }

    pub async fn get_state(&self) -> Result<(), SessionError> {
        self.send(Command::GetState).await
    }

    pub async fn snapshot(&self) -> Result<View, SessionError> {
        let (reply, view) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        Ok(view.await.map_err(|_| ChannelStopped)?)
    }

    /// Returns once the server has acknowledged the close, checking every poll interval.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.send(Command::Close).await?;
        while !self.closed.load(Ordering::SeqCst) {
            if self.service.is_closed() {
                return Err(ChannelStopped.into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }
}
