use std::{process, sync::Arc};

use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use wittr::{
    application::{
        broadcast::{FeedConfig, FeedServer},
        error::{AppError, error_chain},
        freshness::Freshness,
        generator::SyntheticPostGenerator,
        store::FeedStore,
        sync::{AssetJanitor, LogStatusSink, SyncClient},
    },
    cache::{
        CacheStorage, CacheTier, EvictionPolicy, PrecacheManifest, ResponseCache, StaticSetup,
        TierName, start_static_tier,
    },
    config,
    infra::{
        db::{SqliteCacheStorage, SqliteRepositories},
        error::InfraError,
        fetch::{FlickrAssetResolver, HttpFetcher},
        http::{FeedState, ProxyState, build_feed_router, build_proxy_router},
        telemetry,
        ws_client::WebSocketConnector,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error_chain(error), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error_chain(error), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Client(_) => run_client(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let feed = Arc::new(FeedServer::new(
        FeedConfig {
            capacity: settings.feed.capacity,
            tick_min: settings.feed.tick_min,
            tick_max: settings.feed.tick_max,
            ..FeedConfig::default()
        },
        Arc::new(SyntheticPostGenerator::new()),
    ));
    feed.initialize().await;

    let resolver =
        FlickrAssetResolver::new(settings.feed.probe_timeout).map_err(InfraError::from)?;

    let cancel = CancellationToken::new();
    let ticker = {
        let feed = feed.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { feed.run(cancel).await })
    };

    let router = build_feed_router(FeedState {
        feed,
        resolver: Arc::new(resolver),
        avatars_dir: Arc::new(settings.feed.avatars_dir.clone()),
        public_dir: Arc::new(settings.feed.public_dir.clone()),
        fallback_icon: Arc::new(settings.feed.fallback_icon.clone()),
    });

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    info!(
        target = "wittr::serve",
        addr = %settings.server.addr,
        capacity = settings.feed.capacity.get(),
        "feed server listening"
    );

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|err| AppError::from(InfraError::serve(settings.server.addr, err)));

    cancel.cancel();
    drain(&settings, vec![ticker]).await;
    result
}

async fn run_client(settings: config::Settings) -> Result<(), AppError> {
    let client = &settings.client;

    let pool = SqliteRepositories::connect(
        &client.database_url,
        client.database_max_connections.get(),
    )
    .await
    .map_err(InfraError::from)?;
    SqliteRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;

    let store: Arc<dyn FeedStore> =
        Arc::new(SqliteRepositories::new(pool.clone(), settings.feed.capacity));
    let storage: Arc<dyn CacheStorage> =
        Arc::new(SqliteCacheStorage::new(pool, settings.cache.quota_bytes));
    let fetcher = Arc::new(
        HttpFetcher::new(client.origin.clone()).map_err(InfraError::from)?,
    );

    let manifest = PrecacheManifest {
        assets: settings.cache.precache.clone(),
        build_manifest: settings.cache.build_manifest.clone(),
        fonts: settings.cache.fonts.clone(),
        fallback_icon: Some(settings.cache.fallback_icon.clone()),
    };
    let StaticSetup {
        classifier,
        active,
        installed,
    } = start_static_tier(
        storage.as_ref(),
        settings.cache.static_version,
        &manifest,
        fetcher.as_ref(),
    )
    .await?;

    let static_tier = Arc::new(CacheTier::new(
        TierName::Static(active),
        storage.clone(),
        EvictionPolicy::UNBOUNDED,
    ));
    let content_tier = Arc::new(CacheTier::new(
        TierName::Content,
        storage,
        settings.cache.preset.policy(),
    ));
    let cache = Arc::new(ResponseCache::new(
        classifier,
        static_tier,
        content_tier.clone(),
        fetcher,
    ));

    let sync = Arc::new(SyncClient::new(
        Arc::new(WebSocketConnector::new(&client.origin)?),
        store.clone(),
        Arc::new(Freshness::new()),
        Arc::new(LogStatusSink),
        client.reconnect_delay,
    ));
    let janitor = Arc::new(AssetJanitor::new(store, content_tier, client.gc_interval));

    let cancel = CancellationToken::new();
    let sync_task = {
        let sync = sync.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { sync.run(cancel).await })
    };
    let janitor_task = {
        let janitor = janitor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { janitor.run(cancel).await })
    };

    let listener = TcpListener::bind(client.listen_addr)
        .await
        .map_err(|err| InfraError::bind(client.listen_addr, err))?;
    info!(
        target = "wittr::client",
        addr = %client.listen_addr,
        origin = %client.origin,
        static_version = %active,
        static_installed = installed,
        "cache proxy listening"
    );

    let result = axum::serve(listener, build_proxy_router(ProxyState { cache }).into_make_service())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|err| AppError::from(InfraError::serve(client.listen_addr, err)));

    cancel.cancel();
    drain(&settings, vec![sync_task, janitor_task]).await;
    result
}

/// Resolve on Ctrl-C or when `cancel` fires elsewhere, cancelling in both cases.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!(target = "wittr::shutdown", "shutdown requested"),
            Err(err) => {
                error!(target = "wittr::shutdown", error = %err, "failed to listen for ctrl-c");
                cancel.cancelled().await;
            }
        },
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

async fn drain(settings: &config::Settings, tasks: Vec<JoinHandle<()>>) {
    let wait = async {
        for task in tasks {
            if let Err(err) = task.await {
                warn!(target = "wittr::shutdown", error = %err, "background task ended abnormally");
            }
        }
    };
    if tokio::time::timeout(settings.server.graceful_shutdown, wait)
        .await
        .is_err()
    {
        warn!(target = "wittr::shutdown", "background tasks did not stop in time");
    }
}
