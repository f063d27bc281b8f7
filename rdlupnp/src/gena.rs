//! GENA event subscriptions.
//!
//! Unlike regular SOAP operations these use the HTTP SUBSCRIBE / UNSUBSCRIBE
//! methods against a service's eventSubURL. The [`NotifySink`] is the local
//! HTTP endpoint given to devices as the CALLBACK target; deliveries are
//! acknowledged and logged, decoding of evented state variables is left to
//! the subscription owner.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum GenaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("subscription rejected with HTTP status {0}")]
    Rejected(u16),

    #[error("subscription response has no SID header")]
    MissingSid,
}

/// Active GENA subscription as granted by the device.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub sid: String,
    pub timeout_secs: u32,
}

/// Client GENA (SUBSCRIBE / UNSUBSCRIBE)
#[derive(Debug, Clone)]
pub struct GenaClient {
    http: reqwest::Client,
}

impl GenaClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Establish a subscription on `event_url`, delivering events to
    /// `callback_url`.
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_secs: u32,
    ) -> Result<Subscription, GenaError> {
        let method = reqwest::Method::from_bytes(b"SUBSCRIBE").unwrap();

        let response = self
            .http
            .request(method, event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        subscription_from_response(response)
    }

    /// Renew an existing subscription identified by `sid`.
    pub async fn renew(
        &self,
        event_url: &str,
        sid: &str,
        timeout_secs: u32,
    ) -> Result<Subscription, GenaError> {
        let method = reqwest::Method::from_bytes(b"SUBSCRIBE").unwrap();

        let response = self
            .http
            .request(method, event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        subscription_from_response(response)
    }

    /// Drop a subscription. Failures are reported but harmless: the device
    /// expires the subscription on its own once the timeout lapses.
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<(), GenaError> {
        let method = reqwest::Method::from_bytes(b"UNSUBSCRIBE").unwrap();

        let response = self
            .http
            .request(method, event_url)
            .header("SID", sid)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::Rejected(response.status().as_u16()));
        }

        Ok(())
    }
}

fn subscription_from_response(response: reqwest::Response) -> Result<Subscription, GenaError> {
    if !response.status().is_success() {
        return Err(GenaError::Rejected(response.status().as_u16()));
    }

    let sid = response
        .headers()
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(GenaError::MissingSid)?;

    let timeout_secs = response
        .headers()
        .get("TIMEOUT")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_timeout_header)
        .unwrap_or(1800);

    Ok(Subscription { sid, timeout_secs })
}

/// Parse un header TIMEOUT GENA ("Second-1800", ou "infinite")
fn parse_timeout_header(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("infinite") {
        return Some(u32::MAX);
    }

    trimmed
        .strip_prefix("Second-")
        .or_else(|| trimmed.strip_prefix("second-"))
        .and_then(|secs| secs.trim().parse().ok())
}

/// Local endpoint answering NOTIFY deliveries from subscribed devices.
pub struct NotifySink {
    port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl NotifySink {
    /// Bind the sink on an ephemeral port reachable from every interface.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let port = listener.local_addr()?.port();

        let app = axum::Router::new().fallback(handle_notify);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = serve.await {
                warn!("notify sink terminated: {}", e);
            }
        });

        info!("GENA notify sink listening on port {}", port);

        Ok(Self {
            port,
            shutdown,
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Callback URL to hand out in SUBSCRIBE requests, built with the local
    /// address the device can reach us on.
    pub fn callback_url(&self, host_ip: &str) -> String {
        format!("http://{}:{}/notify", host_ip, self.port)
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for NotifySink {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

async fn handle_notify(request: Request<Body>) -> Response {
    if request.method().as_str() != "NOTIFY" {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }

    let sid = request
        .headers()
        .get("SID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>");

    debug!("GENA notify received (SID {})", sid);

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_header_parsing() {
        assert_eq!(parse_timeout_header("Second-1800"), Some(1800));
        assert_eq!(parse_timeout_header("second-300"), Some(300));
        assert_eq!(parse_timeout_header("infinite"), Some(u32::MAX));
        assert_eq!(parse_timeout_header("garbage"), None);
    }

    #[tokio::test]
    async fn notify_sink_answers_notify_only() {
        let sink = NotifySink::bind().await.unwrap();
        let url = sink.callback_url("127.0.0.1");
        assert_eq!(url, format!("http://127.0.0.1:{}/notify", sink.port()));

        let client = reqwest::Client::new();

        let notify = reqwest::Method::from_bytes(b"NOTIFY").unwrap();
        let response = client.request(notify, &url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 501);
    }
}
