//! Feed protocol types shared by the library, the object store and clients.
//!
//! This module defines:
//! - Item records as returned by the object store
//! - Query shapes (near-point pages, leaderboard)
//! - Viewport session messages (client → server, server → client)
//! - Feed tuning (`FeedConfig`)

use foundation::{GeoPoint, ItemId, Region, UserId};
use serde::{Deserialize, Serialize};

use crate::request::FetchId;

/// Unique identifier for a viewport session.
pub type SessionId = String;

/// Point-of-interest category.
///
/// Unknown category names are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Art,
    Nature,
    Urban,
    Rustic,
    Historical,
    Landmark,
    PhotoOp,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Art => "Art",
            Category::Nature => "Nature",
            Category::Urban => "Urban",
            Category::Rustic => "Rustic",
            Category::Historical => "Historical",
            Category::Landmark => "Landmark",
            Category::PhotoOp => "Photo Op",
            Category::Other(s) => s,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Art" => Category::Art,
            "Nature" => Category::Nature,
            "Urban" => Category::Urban,
            "Rustic" => Category::Rustic,
            "Historical" => Category::Historical,
            "Landmark" => Category::Landmark,
            "Photo Op" => Category::PhotoOp,
            _ => Category::Other(s),
        }
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discoverable point of interest, as stored by the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: Category,
    pub geopoint: GeoPoint,
    /// URL of the item's image, if one was uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<UserId>,
}

/// Payload for adding a new item. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: Category,
    pub geopoint: GeoPoint,
    #[serde(default)]
    pub image: Option<String>,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if !self.geopoint.is_valid() {
            return Err(format!(
                "invalid geopoint: lat={} lon={}",
                self.geopoint.latitude, self.geopoint.longitude
            ));
        }
        Ok(())
    }

    pub fn into_item(self, id: ItemId, author: Option<UserId>) -> Item {
        Item {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            category: self.category,
            geopoint: self.geopoint,
            image: self.image,
            author,
        }
    }
}

/// A user profile as shown on the leaderboard and the profile page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub full_name: String,
    /// Users without a score are left off the leaderboard.
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub created_locations: Vec<ItemId>,
    #[serde(default)]
    pub visited_locations: Vec<ItemId>,
}

impl Profile {
    /// Bare profile for a user first seen as an item author.
    pub fn new(id: UserId) -> Self {
        Self {
            full_name: id.to_string(),
            id,
            score: None,
            profile_image: None,
            created_locations: Vec::new(),
            visited_locations: Vec::new(),
        }
    }

    /// Drops location ids for which `exists` is false. Returns whether
    /// anything was removed.
    pub fn prune_locations(&mut self, exists: impl Fn(&ItemId) -> bool) -> bool {
        let before = self.created_locations.len() + self.visited_locations.len();
        self.created_locations.retain(|id| exists(id));
        self.visited_locations.retain(|id| exists(id));
        before != self.created_locations.len() + self.visited_locations.len()
    }
}

/// Distance-ordered page of items around `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NearQuery {
    pub origin: GeoPoint,
    pub limit: usize,
    pub skip: usize,
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The visible map region moved or zoomed.
    ViewportChanged { region: Region },

    /// The map finished its first load with a valid location fix.
    MapLoaded { region: Region },

    /// Drop everything known to the session and refetch the current viewport.
    Reset,

    /// Ping for keepalive.
    Ping { seq: u64 },
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session established.
    Hello {
        session_id: SessionId,
        server_version: String,
    },

    /// The viewport is too zoomed out; show the "zoom in" warning.
    OutOfRange,

    /// The viewport is back in range; hide the warning.
    InRange,

    /// A geo-box fetch for `region` was issued.
    FetchStarted { fetch: FetchId, region: Region },

    /// Items new to this session, from the given fetch.
    Items { fetch: FetchId, items: Vec<Item> },

    /// The store failed to answer a fetch. The loaded region is not rolled back.
    FetchFailed { fetch: FetchId, message: String },

    /// The session collection was cleared.
    Cleared,

    /// Pong response.
    Pong { seq: u64 },

    /// Error message.
    Error { code: String, message: String },
}

/// Tuning for viewport fetching and list paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Viewports whose diagonal exceeds this many map points are out of range.
    pub max_viewport_span: f64,

    /// Width/height multiplier applied to the viewport when it escapes the
    /// loaded region.
    pub expansion_factor: f64,

    /// Rows per page of the distance-ordered list feed.
    pub page_size: usize,

    /// Entries returned by the leaderboard query.
    pub leaderboard_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_viewport_span: 16_093_400.0,
            expansion_factor: 2.0,
            page_size: 10,
            leaderboard_limit: 20,
        }
    }
}
