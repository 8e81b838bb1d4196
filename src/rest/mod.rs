pub mod convert;
pub mod entities;
pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use entities::*;
use error::GatewayError;

use crate::model::ServiceHandle;

/// One request/response exchange with the homebroker server.
///
/// Implementations never interpret status codes: a reachable server always yields `Ok`,
/// whatever the status. `Err` means the exchange itself failed.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_with_reply(&self, endpoint: Endpoint, method: Method, payload: Payload) -> Result<Reply, GatewayError>;
    async fn send_no_reply(&self, endpoint: Endpoint, method: Method, payload: Payload) -> Result<u16, GatewayError>;
}

pub fn endpoint_url(base_url: &str, endpoint: Endpoint) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), endpoint)
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpGateway {
    pub fn new(base_url: String, timeout: Option<Duration>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, base_url, timeout })
    }

    fn request(&self, endpoint: Endpoint, method: Method, payload: Payload) -> reqwest::RequestBuilder {
        let url = endpoint_url(&self.base_url, endpoint);
        let builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        let builder = match payload {
            Payload::Query(query) => builder.query(&query),
            Payload::Json(body) => builder.json(&body),
        };
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn send_with_reply(&self, endpoint: Endpoint, method: Method, payload: Payload) -> Result<Reply, GatewayError> {
        log::debug!("{} {}", method, endpoint);
        let response = self.request(endpoint, method, payload).send().await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Ok(Reply { status, body: None });
        }
        let text = response.text().await?;
        let body = serde_json::from_str(&text)?;
        Ok(Reply { status, body: Some(body) })
    }

    async fn send_no_reply(&self, endpoint: Endpoint, method: Method, payload: Payload) -> Result<u16, GatewayError> {
        log::debug!("{} {}", method, endpoint);
        let response = self.request(endpoint, method, payload).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Runs `request` against the gateway and classifies the status for it.
pub async fn send(gateway: &dyn Gateway, request: Request) -> Response {
    let (endpoint, method, payload) = (request.endpoint(), request.method(), request.payload());
    let reply = if request.expects_body() {
        gateway.send_with_reply(endpoint, method, payload).await
    } else {
        gateway.send_no_reply(endpoint, method, payload).await.map(|status| Reply { status, body: None })
    };
    match reply {
        Ok(Reply { status: 200, body }) => Response::Done(request, body),
        Ok(Reply { status, .. }) if status >= 500 => Response::Err(request, GatewayError::Server(status)),
        Ok(Reply { status, .. }) => {
            let rejection = request.rejection(status);
            Response::Rejected(request, rejection)
        }
        Err(e) => Response::Err(request, e),
    }
}

pub fn start_client(gateway: Arc<dyn Gateway>, receiver: Receiver<Request>, sender: Sender<Response>) {
    tokio::spawn(async move {
        while let Ok(req) = receiver.recv().await {
            let res = send(gateway.as_ref(), req).await;
            if sender.send(res).await.is_err() {
                break;
            }
        }
        log::debug!("rest client stopped");
    });
}

pub struct Rest;

impl Rest {
    /// Requests are sent one at a time, in the order they were queued. Responses never wait
    /// for the caller, so a caller blocked on a full request queue always gets unblocked.
    pub fn start(gateway: Arc<dyn Gateway>) -> ServiceHandle<Request, Response> {
        let (to_rest, receiver) = async_channel::bounded(100);
        let (sender, from_rest) = async_channel::unbounded();
        start_client(gateway, receiver, sender);
        ServiceHandle::new(to_rest, from_rest)
    }
}


#[cfg(test)]
mod test {
    use super::testing::FakeGateway;
    use super::*;
    use crate::rest::error::Rejection;
    use serde_json::json;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("http://localhost:5000/", Endpoint::Quote), "http://localhost:5000/quote");
        assert_eq!(endpoint_url("http://hb:80", Endpoint::Login), "http://hb:80/login");
    }

    #[tokio::test]
    async fn test_send_classifies_status() {
        let gateway = FakeGateway::default();
        gateway.reply(Endpoint::Quote, Method::Get, 200, Some(json!({"PETR4": 10.5})));
        gateway.reply(Endpoint::Quote, Method::Post, 404, None);
        gateway.reply(Endpoint::Status, Method::Get, 503, None);

        let quotes = Request::Quotes { client_name: "alice".to_owned() };
        match send(&gateway, quotes.clone()).await {
            Response::Done(req, Some(body)) => {
                assert_eq!(req, quotes);
                assert_eq!(body["PETR4"], 10.5);
            }
            other => panic!("unexpected {:?}", other),
        }

        let add = Request::AddQuote { client_name: "alice".to_owned(), ticker: "XXXX".to_owned() };
        assert!(matches!(send(&gateway, add).await, Response::Rejected(_, Rejection::UnknownTicker)));

        let status = Request::Status { client_name: "alice".to_owned() };
        assert!(matches!(send(&gateway, status).await, Response::Err(_, GatewayError::Server(503))));

        let close = Request::Close { client_name: "alice".to_owned() };
        assert!(matches!(send(&gateway, close).await, Response::Done(_, None)));
        assert_eq!(gateway.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_rest_keeps_order() {
        let gateway = Arc::new(FakeGateway::default());
        let rest = Rest::start(gateway.clone());
        for ticker in ["A", "B", "C"] {
            let req = Request::AddQuote { client_name: "alice".to_owned(), ticker: ticker.to_owned() };
            rest.send(req).await.unwrap();
        }
        for ticker in ["A", "B", "C"] {
            match rest.recv().await.unwrap() {
                Response::Done(Request::AddQuote { ticker: t, .. }, None) => assert_eq!(t, ticker),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
