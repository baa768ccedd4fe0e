//! Install and activation of static tier versions.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{info, warn};

use super::{
    CacheError,
    engine::Fetcher,
    keys::Classifier,
    storage::{CacheStorage, CachedResponse, StoredEntry},
    strategy::StrategyPlan,
    tier::{CacheVersion, TierName},
};

/// Everything a static version must hold before it may take control.
#[derive(Debug, Clone, Default)]
pub struct PrecacheManifest {
    pub assets: Vec<String>,
    /// JSON file shaped `{ "files": { "<name>": "<path>" } }`.
    pub build_manifest: Option<PathBuf>,
    pub fonts: Vec<String>,
    pub fallback_icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuildManifest {
    #[serde(default)]
    files: BTreeMap<String, String>,
}

impl PrecacheManifest {
    /// Flatten into the request list, in declaration order, without duplicates.
    pub async fn resolve(&self) -> Result<Vec<String>, CacheError> {
        let built = match &self.build_manifest {
            Some(path) => read_build_manifest(path).await?,
            None => Vec::new(),
        };
        Ok(self.requests_with(built))
    }

    /// The request list without the build manifest's files.
    pub fn configured_requests(&self) -> Vec<String> {
        self.requests_with(Vec::new())
    }

    fn requests_with(&self, built: Vec<String>) -> Vec<String> {
        let mut requests = self.assets.clone();
        requests.extend(built);
        requests.extend(self.fonts.iter().cloned());
        requests.extend(self.fallback_icon.iter().cloned());

        let mut seen = HashSet::new();
        requests.retain(|request| seen.insert(request.clone()));
        requests
    }
}

async fn read_build_manifest(path: &Path) -> Result<Vec<String>, CacheError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
        CacheError::Install(format!(
            "reading build manifest {}: {err}",
            path.display()
        ))
    })?;
    let manifest: BuildManifest = serde_json::from_str(&raw).map_err(|err| {
        CacheError::Install(format!(
            "parsing build manifest {}: {err}",
            path.display()
        ))
    })?;
    Ok(manifest.files.into_values().collect())
}

/// Populate the static tier for `version`.
///
/// Every request is fetched, and must succeed, before anything is written, so
/// a failed install leaves storage untouched. Re-installing the version that
/// is already serving refreshes it in place. If a write fails part way, the
/// tier is discarded only when this call created it.
pub async fn install(
    storage: &dyn CacheStorage,
    version: CacheVersion,
    manifest: &PrecacheManifest,
    classifier: &Classifier,
    fetcher: &dyn Fetcher,
) -> Result<usize, CacheError> {
    let requests = manifest.resolve().await?;
    install_requests(storage, version, &requests, classifier, fetcher).await
}

async fn install_requests(
    storage: &dyn CacheStorage,
    version: CacheVersion,
    requests: &[String],
    classifier: &Classifier,
    fetcher: &dyn Fetcher,
) -> Result<usize, CacheError> {
    let tier = TierName::Static(version).to_string();
    let fetched = fetch_all(requests, classifier, fetcher)
        .await
        .map_err(into_install_error)?;

    let existed = storage.tier_names().await?.contains(&tier);
    for (key, response) in fetched {
        if let Err(err) = storage.put(&tier, &key, StoredEntry::now(response)).await {
            if !existed {
                if let Err(cleanup) = storage.delete_tier(&tier).await {
                    warn!(
                        target = "wittr::cache",
                        tier = %tier,
                        error = %cleanup,
                        "failed to discard incomplete tier"
                    );
                }
            }
            return Err(into_install_error(err));
        }
    }
    info!(
        target = "wittr::cache",
        tier = %tier,
        count = requests.len(),
        refreshed = existed,
        "static tier installed"
    );
    Ok(requests.len())
}

async fn fetch_all(
    requests: &[String],
    classifier: &Classifier,
    fetcher: &dyn Fetcher,
) -> Result<Vec<(String, CachedResponse)>, CacheError> {
    let mut fetched = Vec::with_capacity(requests.len());
    for request in requests {
        let response = fetcher.fetch(request).await?;
        if !(200..300).contains(&response.status) {
            return Err(CacheError::Install(format!(
                "`{request}` answered with status {}",
                response.status
            )));
        }
        let key = StrategyPlan::for_class(classifier.classify(request)).key(request);
        fetched.push((key, response));
    }
    Ok(fetched)
}

fn into_install_error(err: CacheError) -> CacheError {
    match err {
        CacheError::Install(message) => CacheError::Install(message),
        other => CacheError::Install(other.to_string()),
    }
}

/// The static tier a client ended up with at startup.
#[derive(Debug)]
pub struct StaticSetup {
    pub classifier: Classifier,
    pub active: CacheVersion,
    /// Whether `active` was (re)installed from the network this time.
    pub installed: bool,
}

/// Install and activate `requested`, or keep serving what storage already
/// holds when the manifest or the network fails.
///
/// On failure the requested tier serves if it is already present, then the
/// newest other static version, and finally the requested (empty) version,
/// which fills lazily.
pub async fn start_static_tier(
    storage: &dyn CacheStorage,
    requested: CacheVersion,
    manifest: &PrecacheManifest,
    fetcher: &dyn Fetcher,
) -> Result<StaticSetup, CacheError> {
    let (classifier, installed) = match manifest.resolve().await {
        Ok(requests) => {
            let classifier = Classifier::new(requests.iter().cloned());
            let outcome =
                install_requests(storage, requested, &requests, &classifier, fetcher).await;
            (classifier, outcome)
        }
        Err(err) => (Classifier::new(manifest.configured_requests()), Err(err)),
    };

    match installed {
        Ok(_) => {
            activate(storage, requested).await?;
            Ok(StaticSetup {
                classifier,
                active: requested,
                installed: true,
            })
        }
        Err(err) => {
            let fallback = serving_static_version(storage, requested).await?;
            warn!(
                target = "wittr::cache",
                version = %requested,
                serving = ?fallback.map(|version| version.get()),
                error = %err,
                "static tier install failed"
            );
            Ok(StaticSetup {
                classifier,
                active: fallback.unwrap_or(requested),
                installed: false,
            })
        }
    }
}

/// Delete every static tier other than `current`. The content tier and
/// unrelated names are left alone. Returns the deleted tier names.
pub async fn activate(
    storage: &dyn CacheStorage,
    current: CacheVersion,
) -> Result<Vec<String>, CacheError> {
    let mut deleted = Vec::new();
    for name in storage.tier_names().await? {
        let Ok(parsed) = name.parse::<TierName>() else {
            continue;
        };
        if matches!(parsed, TierName::Static(version) if version != current)
            && storage.delete_tier(&name).await?
        {
            deleted.push(name);
        }
    }
    if !deleted.is_empty() {
        info!(target = "wittr::cache", version = %current, deleted = ?deleted, "static tiers retired");
    }
    Ok(deleted)
}

/// Static version to keep serving: `preferred` when its tier exists,
/// otherwise the newest other static version in storage.
pub async fn serving_static_version(
    storage: &dyn CacheStorage,
    preferred: CacheVersion,
) -> Result<Option<CacheVersion>, CacheError> {
    let installed: Vec<CacheVersion> = storage
        .tier_names()
        .await?
        .iter()
        .filter_map(|name| match name.parse::<TierName>() {
            Ok(TierName::Static(version)) => Some(version),
            _ => None,
        })
        .collect();
    if installed.contains(&preferred) {
        return Ok(Some(preferred));
    }
    Ok(installed.into_iter().max())
}
