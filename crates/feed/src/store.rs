//! Object store abstraction.
//!
//! The `ObjectStore` trait is the boundary to the hosted backend that owns
//! items and profiles. `MemoryStore` is the in-process implementation used by
//! tests and as the query engine behind file-backed stores.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use foundation::{GeoBox, ItemId, UserId};
use parking_lot::RwLock;

use crate::protocol::{Item, NearQuery, NewItem, Profile};

/// Error type for object store operations.
#[derive(Debug)]
pub struct StoreError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Queries against the external object store.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait ObjectStore: Send + Sync {
    /// Items whose coordinate lies inside `bounds`.
    fn within_box(&self, bounds: GeoBox) -> BoxFuture<'_, Result<Vec<Item>, StoreError>>;

    /// Items ordered by distance from `query.origin`, paged by limit/skip.
    fn near(&self, query: NearQuery) -> BoxFuture<'_, Result<Vec<Item>, StoreError>>;

    /// Total number of stored items.
    fn count(&self) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// Store a new item authored by `author` and return it with its id.
    fn insert(&self, item: NewItem, author: UserId) -> BoxFuture<'_, Result<Item, StoreError>>;

    /// Profiles that have a score, highest first, at most `limit`.
    fn leaderboard(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Profile>, StoreError>>;

    /// One user's profile, with location ids that no longer resolve left out.
    fn profile(&self, id: UserId) -> BoxFuture<'_, Result<Option<Profile>, StoreError>>;
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<Vec<Item>>,
    profiles: RwLock<Vec<Profile>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(items: Vec<Item>, profiles: Vec<Profile>) -> Self {
        Self {
            next_id: AtomicU64::new(items.len() as u64),
            items: RwLock::new(items),
            profiles: RwLock::new(profiles),
        }
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.read().clone()
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.profiles.read().clone()
    }

    pub fn upsert_profile(&self, profile: Profile) {
        let mut profiles = self.profiles.write();
        profiles.retain(|p| p.id != profile.id);
        profiles.push(profile);
    }

    pub fn query_within_box(&self, bounds: &GeoBox) -> Vec<Item> {
        self.items
            .read()
            .iter()
            .filter(|item| bounds.contains(&item.geopoint))
            .cloned()
            .collect()
    }

    pub fn query_near(&self, query: &NearQuery) -> Vec<Item> {
        let items = self.items.read();
        let mut ranked: Vec<(f64, &Item)> = items
            .iter()
            .map(|item| (query.origin.distance_m(&item.geopoint), item))
            .collect();
        // Ties break by id so pages are stable across calls.
        ranked.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));

        ranked
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn query_leaderboard(&self, limit: usize) -> Vec<Profile> {
        let mut scored: Vec<Profile> = self
            .profiles
            .read()
            .iter()
            .filter(|p| p.score.is_some())
            .cloned()
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.full_name.cmp(&b.full_name))
        });
        scored.truncate(limit);
        scored
    }

    pub fn insert_item(&self, item: NewItem, author: UserId) -> Result<Item, StoreError> {
        let item = self.stage_item(item, author)?;
        self.commit_item(item.clone());
        Ok(item)
    }

    /// Validates `item` and assigns it a fresh id without storing it.
    pub fn stage_item(&self, item: NewItem, author: UserId) -> Result<Item, StoreError> {
        item.validate().map_err(StoreError::new)?;

        let items = self.items.read();
        // Skip ids that collide with preloaded contents.
        let id = loop {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let candidate = ItemId::new(format!("loc-{n}"));
            if !items.iter().any(|i| i.id == candidate) {
                break candidate;
            }
        };
        Ok(item.into_item(id, Some(author)))
    }

    /// Stores a staged item and records it on its author's profile.
    pub fn commit_item(&self, item: Item) {
        // Item first, so a concurrent profile view never prunes the new id.
        let stored = item.clone();
        self.items.write().push(item);
        record_created(&mut self.profiles.write(), &stored);
    }

    /// Items and profiles as they would be after committing `staged`.
    pub fn contents_with(&self, staged: &Item) -> (Vec<Item>, Vec<Profile>) {
        let mut profiles = self.profiles();
        record_created(&mut profiles, staged);
        let mut items = self.items();
        items.push(staged.clone());
        (items, profiles)
    }

    pub fn query_profile(&self, id: &UserId) -> Option<Profile> {
        let mut profile = self.profiles.read().iter().find(|p| &p.id == id).cloned()?;
        let known = self.item_ids();
        profile.prune_locations(|item| known.contains(item));
        Some(profile)
    }

    /// All profiles with `id`'s dangling location ids removed, or `None` when
    /// there is nothing to prune.
    pub fn pruned_profiles(&self, id: &UserId) -> Option<Vec<Profile>> {
        let known = self.item_ids();
        let mut profiles = self.profiles();
        let profile = profiles.iter_mut().find(|p| &p.id == id)?;
        profile
            .prune_locations(|item| known.contains(item))
            .then_some(profiles)
    }

    pub fn set_profiles(&self, profiles: Vec<Profile>) {
        *self.profiles.write() = profiles;
    }

    fn item_ids(&self) -> HashSet<ItemId> {
        self.items.read().iter().map(|i| i.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn within_box(&self, bounds: GeoBox) -> BoxFuture<'_, Result<Vec<Item>, StoreError>> {
        Box::pin(async move { Ok(self.query_within_box(&bounds)) })
    }

    fn near(&self, query: NearQuery) -> BoxFuture<'_, Result<Vec<Item>, StoreError>> {
        Box::pin(async move { Ok(self.query_near(&query)) })
    }

    fn count(&self) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(async move { Ok(self.len() as u64) })
    }

    fn insert(&self, item: NewItem, author: UserId) -> BoxFuture<'_, Result<Item, StoreError>> {
        Box::pin(async move { self.insert_item(item, author) })
    }

    fn leaderboard(&self, limit: usize) -> BoxFuture<'_, Result<Vec<Profile>, StoreError>> {
        Box::pin(async move { Ok(self.query_leaderboard(limit)) })
    }

    fn profile(&self, id: UserId) -> BoxFuture<'_, Result<Option<Profile>, StoreError>> {
        Box::pin(async move { Ok(self.query_profile(&id)) })
    }
}

/// Appends `item` to its author's created locations, creating a bare profile
/// for authors seen for the first time.
fn record_created(profiles: &mut Vec<Profile>, item: &Item) {
    let Some(author) = item.author.as_ref() else {
        return;
    };
    let index = match profiles.iter().position(|p| &p.id == author) {
        Some(index) => index,
        None => {
            profiles.push(Profile::new(author.clone()));
            profiles.len() - 1
        }
    };
    let created = &mut profiles[index].created_locations;
    if !created.contains(&item.id) {
        created.push(item.id.clone());
    }
}
