//! Websocket transport for the sync client.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use time::OffsetDateTime;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::{
    application::sync::{BatchStream, FeedConnector, SyncError},
    domain::post::{Post, to_epoch_millis},
};

pub const UPDATES_PATH: &str = "/updates";

/// Opens `/updates` on the feed origin.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: Url,
}

impl WebSocketConnector {
    /// `origin` is the HTTP(S) origin of the feed server.
    pub fn new(origin: &Url) -> Result<Self, SyncError> {
        let mut endpoint = origin.join(UPDATES_PATH).map_err(SyncError::transport)?;
        let scheme = match endpoint.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|()| SyncError::transport(format!("cannot use `{origin}` as ws origin")))?;
        Ok(Self { endpoint })
    }

    pub fn endpoint_for(&self, since: Option<OffsetDateTime>) -> Url {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &to_epoch_millis(since).to_string());
        }
        url
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn open(&self, since: Option<OffsetDateTime>) -> Result<BatchStream, SyncError> {
        let url = self.endpoint_for(since);
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(SyncError::transport)?;
        debug!(target = "wittr::sync", url = %url, "websocket connected");

        let batches = stream::unfold(socket, |mut socket| async move {
            loop {
                let item = match socket.next().await? {
                    Ok(Message::Text(text)) => decode_batch(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => decode_batch(&bytes),
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => continue,
                    Err(err) => Err(SyncError::transport(err)),
                };
                return Some((item, socket));
            }
        });
        Ok(batches.boxed())
    }
}

fn decode_batch(payload: &[u8]) -> Result<Vec<Post>, SyncError> {
    serde_json::from_slice(payload).map_err(SyncError::decode)
}
