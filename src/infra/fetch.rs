//! Network access through `reqwest`: the cache's origin fetcher and the remote
//! photo resolver used by the feed server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, redirect};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    cache::{CacheError, CachedResponse, Fetcher},
    domain::assets::PhotoRequest,
};

fn user_agent() -> &'static str {
    concat!("wittr/", env!("CARGO_PKG_VERSION"))
}

/// Fetches cache misses from the feed origin.
///
/// Redirects are not followed so that a `301` from the photo endpoint reaches
/// the cache as-is.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent())
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn resolve(&self, request: &str) -> Result<Url, CacheError> {
        // `join` keeps absolute URLs intact and resolves paths against the origin.
        self.origin
            .join(request)
            .map_err(|err| CacheError::network(request, err))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &str) -> Result<CachedResponse, CacheError> {
        let url = self.resolve(request)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| CacheError::network(url.as_str(), err))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| CacheError::network(url.as_str(), err))?;

        debug!(
            target = "wittr::fetch",
            url = %url,
            status,
            bytes = body.len(),
            "fetched from origin"
        );
        Ok(CachedResponse::new(status, headers, body))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid remote asset url: {0}")]
    Url(#[from] url::ParseError),
    #[error("remote asset probe failed: {0}")]
    Probe(#[from] reqwest::Error),
}

/// Maps a photo request onto the remote URL that actually serves it.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    async fn resolve(&self, photo: &PhotoRequest) -> Result<Url, ResolveError>;
}

/// Resolves photos against the Flickr static farm and probes the result.
///
/// Any answer from the remote counts as success; only transport failures fall
/// back.
#[derive(Clone, Debug)]
pub struct FlickrAssetResolver {
    client: Client,
}

impl FlickrAssetResolver {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent())
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn remote_url(photo: &PhotoRequest) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "http://farm{}.staticflickr.com/{}/{}_{}_{}.jpg",
            photo.farm,
            photo.server,
            photo.id,
            photo.secret,
            photo.size.provider_suffix()
        ))
    }
}

#[async_trait]
impl AssetResolver for FlickrAssetResolver {
    async fn resolve(&self, photo: &PhotoRequest) -> Result<Url, ResolveError> {
        let url = Self::remote_url(photo)?;
        let response = self.client.get(url.clone()).send().await?;
        debug!(
            target = "wittr::fetch",
            url = %url,
            status = response.status().as_u16(),
            "remote photo probed"
        );
        Ok(url)
    }
}
