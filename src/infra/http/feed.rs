use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Component, Path as FsPath, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{
        HeaderValue, StatusCode, Uri,
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE, LOCATION},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::{
    application::{
        broadcast::{FeedServer, SubscribeRequest, Subscription},
        error::HttpError,
    },
    domain::{
        assets::PhotoRequest,
        post::{Post, from_epoch_millis},
    },
    infra::fetch::AssetResolver,
};

use super::middleware::{log_responses, set_request_context};

const AVATAR_CACHE_CONTROL: &str = "public, max-age=0";
const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
pub struct FeedState {
    pub feed: Arc<FeedServer>,
    pub resolver: Arc<dyn AssetResolver>,
    pub avatars_dir: Arc<PathBuf>,
    pub public_dir: Arc<PathBuf>,
    pub fallback_icon: Arc<PathBuf>,
}

pub fn build_feed_router(state: FeedState) -> Router {
    Router::new()
        .route("/updates", get(updates))
        .route("/photos/{file}", get(photo))
        .route("/ping", get(ping))
        .route("/avatars/{*path}", get(avatar))
        .fallback(get(public_asset))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// `since` is epoch milliseconds; anything unparsable counts as absent.
fn subscribe_request(params: &HashMap<String, String>) -> SubscribeRequest {
    let since = params
        .get("since")
        .and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|millis| from_epoch_millis(millis).ok());
    SubscribeRequest {
        since,
        skip_catch_up: params.contains_key("no-socket"),
    }
}

async fn updates(
    ws: WebSocketUpgrade,
    State(state): State<FeedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request = subscribe_request(&params);
    ws.on_upgrade(move |socket| serve_subscriber(socket, state.feed, request))
}

async fn serve_subscriber(socket: WebSocket, feed: Arc<FeedServer>, request: SubscribeRequest) {
    let Subscription {
        catch_up,
        mut updates,
    } = feed.subscribe(request).await;
    let (mut sender, mut receiver) = socket.split();

    if !catch_up.is_empty() {
        if let Err(err) = send_batch(&mut sender, &catch_up).await {
            debug!(target = "wittr::http::updates", error = %err, "catch-up send failed");
            return;
        }
        debug!(
            target = "wittr::http::updates",
            posts = catch_up.len(),
            "catch-up sent"
        );
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(batch) => {
                    if let Err(err) = send_batch(&mut sender, &batch).await {
                        debug!(target = "wittr::http::updates", error = %err, "subscriber went away");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "wittr::http::updates", skipped, "slow subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_batch(
    sender: &mut SplitSink<WebSocket, Message>,
    posts: &[Post],
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(posts) {
        Ok(payload) => payload,
        Err(err) => {
            error!(target = "wittr::http::updates", error = %err, "failed to encode batch");
            return Ok(());
        }
    };
    sender.send(Message::Text(payload.into())).await
}

async fn photo(State(state): State<FeedState>, Path(file): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::feed::photo";

    let photo = match PhotoRequest::parse(&file) {
        Ok(photo) => photo,
        Err(err) => {
            debug!(target = SOURCE, error = %err, "unresolvable photo request");
            return fallback_icon(&state).await;
        }
    };

    match state.resolver.resolve(&photo).await {
        Ok(url) => match HeaderValue::from_str(url.as_str()) {
            Ok(location) => {
                (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response()
            }
            Err(err) => {
                warn!(target = SOURCE, error = %err, "remote url is not a valid header");
                fallback_icon(&state).await
            }
        },
        Err(err) => {
            warn!(target = SOURCE, photo = %photo.reference(), error = %err, "remote photo unavailable");
            fallback_icon(&state).await
        }
    }
}

async fn fallback_icon(state: &FeedState) -> Response {
    const SOURCE: &str = "infra::http::feed::fallback_icon";

    match tokio::fs::read(state.fallback_icon.as_path()).await {
        Ok(bytes) => file_response(state.fallback_icon.as_path(), bytes, None),
        Err(err) => HttpError::new(SOURCE, StatusCode::NOT_FOUND, "Photo unavailable")
            .caused_by(&err)
            .into_response(),
    }
}

async fn ping() -> Response {
    (
        [(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
        Json(json!({ "ok": true })),
    )
        .into_response()
}

async fn avatar(State(state): State<FeedState>, Path(path): Path<String>) -> Response {
    serve_from(
        "infra::http::feed::avatar",
        &state.avatars_dir,
        &path,
        Some(AVATAR_CACHE_CONTROL),
    )
    .await
}

/// Application shell and build artifacts; directories resolve to `index.html`.
async fn public_asset(State(state): State<FeedState>, uri: Uri) -> Response {
    let mut path = uri.path().trim_start_matches('/').to_string();
    if path.is_empty() || path.ends_with('/') {
        path.push_str(INDEX_FILE);
    }
    serve_from("infra::http::feed::public_asset", &state.public_dir, &path, None).await
}

async fn serve_from(
    source: &'static str,
    root: &FsPath,
    path: &str,
    cache_control: Option<&'static str>,
) -> Response {
    let Some(relative) = sanitize_relative(path) else {
        return HttpError::not_found(source, format!("rejected path `{path}`")).into_response();
    };

    let full = root.join(&relative);
    match tokio::fs::read(&full).await {
        Ok(bytes) => file_response(&full, bytes, cache_control),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            HttpError::not_found(source, format!("no file at `{}`", relative.display()))
                .into_response()
        }
        Err(err) => {
            error!(target = "wittr::http::files", path = %full.display(), error = %err, "failed to read file");
            HttpError::new(source, StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
                .caused_by(&err)
                .into_response()
        }
    }
}

/// Only plain relative segments; no traversal, roots or directory listings.
fn sanitize_relative(path: &str) -> Option<PathBuf> {
    if path.is_empty() || path.ends_with('/') {
        return None;
    }
    let candidate = FsPath::new(path);
    candidate
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
        .then(|| candidate.to_path_buf())
}

fn file_response(path: &FsPath, bytes: Vec<u8>, cache_control: Option<&'static str>) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, mime.as_ref());
    if let Some(value) = cache_control {
        builder = builder.header(CACHE_CONTROL, value);
    }
    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
