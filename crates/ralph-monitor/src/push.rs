use crate::poll::SnapshotSource;
use crate::store::SharedState;
use crate::ClientError;
use futures_util::{SinkExt, StreamExt};
use ralph_core::{ClientMessage, PushEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Follows the hub's push channel and merges every event into the store,
/// reconnecting after a fixed delay whenever the channel drops.
pub struct PushClient {
    url: Url,
    store: SharedState,
    reconnect_delay: Duration,
    ping_interval: Duration,
    log_source: Option<Arc<dyn SnapshotSource>>,
}

/// `http://host/...` becomes `ws://host/ws`, `https` becomes `wss`.
pub fn ws_url(hub_url: &Url) -> Result<Url, ClientError> {
    let mut url = hub_url.join("/ws")?;
    let scheme = match hub_url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    if url.set_scheme(scheme).is_err() {
        return Err(ClientError::Url(url::ParseError::RelativeUrlWithoutBase));
    }
    Ok(url)
}

impl PushClient {
    pub fn new(
        hub_url: &Url,
        store: SharedState,
        reconnect_delay: Duration,
        ping_interval: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            url: ws_url(hub_url)?,
            store,
            reconnect_delay,
            ping_interval,
            log_source: None,
        })
    }

    /// Pull the full log once per session, right after `initial_state`,
    /// so deltas pushed afterwards extend the history instead of starting
    /// from nothing.
    pub fn with_log_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.log_source = Some(source);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.session(&mut shutdown).await {
                Ok(()) => info!(event = "push_closed", url = %self.url),
                Err(err) => warn!(event = "push_error", url = %self.url, error = %err),
            }
            self.store.write().await.connected = false;
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(event = "push_stopped");
    }

    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), ClientError> {
        let (mut ws, _) = tokio::select! {
            result = connect_async(self.url.as_str()) => result?,
            _ = shutdown.changed() => return Ok(()),
        };
        ws.send(Message::Text(client_message(ClientMessage::InitialState)?))
            .await?;
        self.store.write().await.connected = true;
        info!(event = "push_connected", url = %self.url);
        if let Some(source) = &self.log_source {
            match source.fetch_logs().await {
                Ok(text) => self.store.write().await.replace_logs(text),
                Err(err) => warn!(event = "log_bootstrap_failed", error = %err),
            }
        }

        let ping_every = if self.ping_interval.is_zero() {
            Duration::from_secs(3600)
        } else {
            self.ping_interval
        };
        let mut ticker = tokio::time::interval(ping_every);
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                }
                _ = ticker.tick(), if !self.ping_interval.is_zero() => {
                    ws.send(Message::Text(client_message(ClientMessage::Ping)?)).await?;
                }
                msg = ws.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => return Err(err.into()),
                    };
                    match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => {
                            debug!(event = "push_event", kind = event.kind());
                            self.store.write().await.apply(event);
                        }
                        Err(err) => warn!(event = "push_decode_failed", error = %err),
                    }
                }
            }
        }
    }
}

fn client_message(message: ClientMessage) -> Result<String, ClientError> {
    Ok(serde_json::to_string(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        let url = ws_url(&Url::parse("http://127.0.0.1:3000").expect("url")).expect("ws");
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/ws");
        let url = ws_url(&Url::parse("https://deck.local/app/").expect("url")).expect("ws");
        assert_eq!(url.as_str(), "wss://deck.local/ws");
    }

    #[tokio::test]
    async fn wss_urls_attempt_a_tls_handshake() {
        use tokio_tungstenite::tungstenite::error::{Error, UrlError};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        let url = ws_url(&Url::parse(&format!("https://{addr}")).expect("url")).expect("ws");
        let err = connect_async(url.as_str()).await.expect_err("no tls server");
        assert!(!matches!(err, Error::Url(UrlError::TlsFeatureNotEnabled)));
    }

    #[test]
    fn client_messages_use_snake_case_types() {
        assert_eq!(
            client_message(ClientMessage::InitialState).expect("json"),
            r#"{"type":"initial_state"}"#
        );
        assert_eq!(client_message(ClientMessage::Ping).expect("json"), r#"{"type":"ping"}"#);
    }
}
