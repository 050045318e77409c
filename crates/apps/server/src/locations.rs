use std::path::{Path, PathBuf};

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use feed::{
    AddItemDenied, BoxFuture, Item, MemoryStore, NearQuery, NewItem, ObjectStore, Profile,
    SessionContext, StoreError,
};
use foundation::{GeoBox, GeoPoint, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::AppState;

/// Header carrying the caller's user id. Absent means "not logged in".
pub const SESSION_USER_HEADER: &str = "x-session-user";

/// Upper bound on `limit` for list queries.
const MAX_PAGE: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    locations: Vec<Item>,
    #[serde(default)]
    profiles: Vec<Profile>,
}

/// JSON-file backed object store.
///
/// The whole file is loaded into a `MemoryStore` on open. Writes build the
/// next snapshot, persist it with a write-to-temp + rename, and only then
/// commit to memory, so a failed save leaves no trace.
pub struct LocationsStore {
    path: PathBuf,
    memory: MemoryStore,
    lock: Mutex<()>,
}

impl LocationsStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str::<Snapshot>(&s)
                .map_err(|e| StoreError::with_source("Failed to parse locations file", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(StoreError::with_source("Failed to read locations file", e)),
        };

        info!(
            "loaded {} locations and {} profiles from {}",
            snapshot.locations.len(),
            snapshot.profiles.len(),
            path.display()
        );

        Ok(Self {
            path,
            memory: MemoryStore::with_contents(snapshot.locations, snapshot.profiles),
            lock: Mutex::new(()),
        })
    }

    /// Removes dangling location ids from `id`'s stored profile. Returns
    /// whether the profile changed.
    pub async fn prune_profile(&self, id: &UserId) -> Result<bool, StoreError> {
        let _g = self.lock.lock().await;
        let Some(profiles) = self.memory.pruned_profiles(id) else {
            return Ok(false);
        };
        self.save_unlocked(&Snapshot {
            locations: self.memory.items(),
            profiles: profiles.clone(),
        })
        .await?;
        self.memory.set_profiles(profiles);
        Ok(true)
    }

    async fn save_unlocked(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::with_source("Failed to create data dir", e))?;
            }
        }

        let text = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::with_source("Failed to encode locations", e))?;

        let tmp = self.path.with_extension("json.tmp");
        let written = match tokio::fs::write(&tmp, text).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| StoreError::with_source("Failed to replace locations file", e)),
            Err(e) => Err(StoreError::with_source("Failed to write locations file", e)),
        };
        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written
    }
}

impl ObjectStore for LocationsStore {
    fn within_box(&self, bounds: GeoBox) -> BoxFuture<'_, Result<Vec<Item>, StoreError>> {
        self.memory.within_box(bounds)
    }

    fn near(&self, query: NearQuery) -> BoxFuture<'_, Result<Vec<Item>, StoreError>> {
        self.memory.near(query)
    }

    fn count(&self) -> BoxFuture<'_, Result<u64, StoreError>> {
        self.memory.count()
    }

    fn insert(&self, item: NewItem, author: UserId) -> BoxFuture<'_, Result<Item, StoreError>> {
        Box::pin(async move {
            let _g = self.lock.lock().await;
            let item = self.memory.stage_item(item, author)?;
            let (locations, profiles) = self.memory.contents_with(&item);
            self.save_unlocked(&Snapshot {
                locations,
                profiles,
            })
            .await?;
            self.memory.commit_item(item.clone());
            Ok(item)
        })
    }

    fn leaderboard(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Profile>, StoreError>> {
        self.memory.leaderboard(limit)
    }

    fn profile(&self, id: UserId) -> BoxFuture<'_, Result<Option<Profile>, StoreError>> {
        self.memory.profile(id)
    }
}

fn session_user(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(SESSION_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn store_error(err: StoreError) -> (StatusCode, Json<Value>) {
    error!("store error: {err}");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Store unavailable: {err}"),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithinParams {
    pub sw_lat: f64,
    pub sw_lon: f64,
    pub ne_lat: f64,
    pub ne_lon: f64,
}

pub async fn list_within(
    State(state): State<AppState>,
    Query(params): Query<WithinParams>,
) -> Result<Json<Vec<Item>>, (StatusCode, Json<Value>)> {
    let bounds = GeoBox::new(
        GeoPoint::new(params.sw_lat, params.sw_lon),
        GeoPoint::new(params.ne_lat, params.ne_lon),
    )
    .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid box: {e}")))?;

    let items = state.store.within_box(bounds).await.map_err(store_error)?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct NearParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: Option<usize>,
}

pub async fn list_near(
    State(state): State<AppState>,
    Query(params): Query<NearParams>,
) -> Result<Json<Vec<Item>>, (StatusCode, Json<Value>)> {
    let origin = GeoPoint::new(params.lat, params.lon);
    if !origin.is_valid() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid origin"));
    }

    let query = NearQuery {
        origin,
        limit: params
            .limit
            .unwrap_or(state.config.feed.page_size)
            .min(MAX_PAGE),
        skip: params.skip.unwrap_or(0),
    };
    let items = state.store.near(query).await.map_err(store_error)?;
    Ok(Json(items))
}

pub async fn count_locations(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let count = state.store.count().await.map_err(store_error)?;
    Ok(Json(json!({ "count": count })))
}

pub async fn add_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(item): Json<NewItem>,
) -> Result<(StatusCode, Json<Item>), (StatusCode, Json<Value>)> {
    let user = session_user(&headers);
    let session = SessionContext::new(user, Some(item.geopoint));
    let author = match session.check_can_add_item() {
        Ok(user) => user.clone(),
        Err(denied @ AddItemDenied::NotLoggedIn) => {
            return Err(api_error(StatusCode::UNAUTHORIZED, denied.to_string()));
        }
        Err(denied @ AddItemDenied::NoLocationFix) => {
            return Err(api_error(StatusCode::BAD_REQUEST, denied.to_string()));
        }
    };

    item.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let saved = state.store.insert(item, author).await.map_err(store_error)?;
    info!("location {} added by {:?}", saved.id, saved.author);
    Ok((StatusCode::CREATED, Json(saved)))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<Vec<Profile>>, (StatusCode, Json<Value>)> {
    let limit = params
        .limit
        .unwrap_or(state.config.feed.leaderboard_limit)
        .min(MAX_PAGE);
    let profiles = state.store.leaderboard(limit).await.map_err(store_error)?;
    Ok(Json(profiles))
}

/// Serves a profile without dangling location ids. When the caller owns the
/// profile the stale ids are also removed from the stored copy.
pub async fn get_profile(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Json<Profile>, (StatusCode, Json<Value>)> {
    let id = UserId::new(id);
    if session_user(&headers).as_ref() == Some(&id)
        && state.store.prune_profile(&id).await.map_err(store_error)?
    {
        info!("pruned stale locations from profile {id}");
    }

    match state.store.profile(id).await.map_err(store_error)? {
        Some(profile) => Ok(Json(profile)),
        None => Err(api_error(StatusCode::NOT_FOUND, "Profile not found")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path as UrlPath, Query, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::Json;
    use feed::{Category, NearQuery, NewItem, ObjectStore};
    use foundation::{GeoPoint, ItemId, UserId};
    use serde_json::json;

    use super::{
        add_location, count_locations, get_profile, list_within, LocationsStore, WithinParams,
    };
    use crate::config::ServerConfig;
    use crate::AppState;

    fn mural(lat: f64, lon: f64) -> NewItem {
        NewItem {
            name: "Mural".to_string(),
            description: None,
            category: Category::Art,
            geopoint: GeoPoint::new(lat, lon),
            image: None,
        }
    }

    fn as_user(id: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(super::SESSION_USER_HEADER, HeaderValue::from_static(id));
        headers
    }

    async fn state_in(dir: &tempfile::TempDir) -> AppState {
        let path = dir.path().join("locations.json");
        let store = LocationsStore::open(&path).await.unwrap();
        AppState {
            store: Arc::new(store),
            config: Arc::new(ServerConfig {
                addr: ([127, 0, 0, 1], 0).into(),
                data_path: path,
                feed: Default::default(),
            }),
        }
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocationsStore::open(dir.path().join("nope.json")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn inserts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("locations.json");

        let store = LocationsStore::open(&path).await.unwrap();
        let saved = store
            .insert(mural(40.0, -74.0), UserId::new("u1"))
            .await
            .unwrap();

        let reopened = LocationsStore::open(&path).await.unwrap();
        let found = reopened
            .near(NearQuery {
                origin: GeoPoint::new(40.0, -74.0),
                limit: 10,
                skip: 0,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, saved.id);
        assert_eq!(found[0].author, Some(UserId::new("u1")));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(LocationsStore::open(&path).await.is_err());
    }

    #[tokio::test]
    async fn adding_requires_session_user() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir).await;

        let err = add_location(State(state.clone()), HeaderMap::new(), Json(mural(40.0, -74.0)))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);

        let mut headers = HeaderMap::new();
        headers.insert(super::SESSION_USER_HEADER, HeaderValue::from_static("u7"));
        let (status, Json(item)) = add_location(State(state.clone()), headers, Json(mural(40.0, -74.0)))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(item.author, Some(UserId::new("u7")));

        let Json(count) = count_locations(State(state)).await.unwrap();
        assert_eq!(count["count"], 1);
    }

    #[tokio::test]
    async fn adding_without_location_fix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir).await;

        let mut headers = HeaderMap::new();
        headers.insert(super::SESSION_USER_HEADER, HeaderValue::from_static("u7"));
        let err = add_location(State(state), headers, Json(mural(0.0, 12.0)))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn within_rejects_inverted_box() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir).await;

        let params = WithinParams {
            sw_lat: 10.0,
            sw_lon: 0.0,
            ne_lat: 0.0,
            ne_lon: 10.0,
        };
        let err = list_within(State(state), Query(params)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_save_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("locations.json");
        let store = LocationsStore::open(&path).await.unwrap();

        // The data directory cannot be created while a file holds its name.
        tokio::fs::write(dir.path().join("sub"), "").await.unwrap();
        let failed = store.insert(mural(40.0, -74.0), UserId::new("u1")).await;
        assert!(failed.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.profile(UserId::new("u1")).await.unwrap().is_none());

        tokio::fs::remove_file(dir.path().join("sub")).await.unwrap();
        store
            .insert(mural(41.0, -74.0), UserId::new("u1"))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let reopened = LocationsStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let profile = reopened.profile(UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(profile.created_locations.len(), 1);
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        let store = LocationsStore::open(&path).await.unwrap();

        // A directory in place of the data file makes the rename fail.
        tokio::fs::create_dir(&path).await.unwrap();
        tokio::fs::write(path.join("keep"), "").await.unwrap();

        assert!(store
            .insert(mural(40.0, -74.0), UserId::new("u1"))
            .await
            .is_err());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn profile_lists_created_locations() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(&dir).await;

        let (_, Json(item)) =
            add_location(State(state.clone()), as_user("u7"), Json(mural(40.0, -74.0)))
                .await
                .unwrap();

        let Json(profile) = get_profile(
            State(state.clone()),
            UrlPath("u7".to_string()),
            HeaderMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(profile.created_locations, vec![item.id]);

        let err = get_profile(State(state), UrlPath("nobody".to_string()), HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn owner_view_prunes_stored_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.json");
        let snapshot = json!({
            "locations": [{
                "id": "kept",
                "name": "Old Mill",
                "category": "Rustic",
                "geopoint": { "latitude": 42.0, "longitude": -71.0 }
            }],
            "profiles": [{
                "id": "u1",
                "fullName": "Ada",
                "score": 3,
                "createdLocations": ["kept", "deleted"],
                "visitedLocations": ["gone", "kept"]
            }]
        });
        tokio::fs::write(&path, snapshot.to_string()).await.unwrap();
        let state = state_in(&dir).await;

        // Someone else's view hides the stale ids but leaves the file alone.
        let Json(view) = get_profile(State(state.clone()), UrlPath("u1".to_string()), as_user("u2"))
            .await
            .unwrap();
        assert_eq!(view.created_locations, vec![ItemId::new("kept")]);
        assert_eq!(view.visited_locations, vec![ItemId::new("kept")]);
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("deleted"));

        get_profile(State(state), UrlPath("u1".to_string()), as_user("u1"))
            .await
            .unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("deleted"));
        assert!(!raw.contains("gone"));
    }
}
