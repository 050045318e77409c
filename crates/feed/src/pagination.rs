use foundation::GeoPoint;
use tracing::debug;

use crate::collection::ItemCollection;
use crate::protocol::{Item, NearQuery};
use crate::store::{ObjectStore, StoreError};

/// Distance-ordered list feed with limit/skip paging.
///
/// Rows are loaded one page at a time; when the last loaded row is displayed
/// the caller re-checks the store's total count and asks for the next page
/// only if more items exist.
#[derive(Debug)]
pub struct ListFeed {
    page_size: usize,
    origin: GeoPoint,
    rows: ItemCollection,
}

impl ListFeed {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            origin: GeoPoint::new(0.0, 0.0),
            rows: ItemCollection::new(),
        }
    }

    pub fn rows(&self) -> &ItemCollection {
        &self.rows
    }

    pub fn origin(&self) -> GeoPoint {
        self.origin
    }

    /// Drops all rows and returns the query for the first page.
    ///
    /// Without a location fix the feed is ordered around (0, 0).
    pub fn reset(&mut self, origin: Option<GeoPoint>) -> NearQuery {
        self.rows.clear();
        self.origin = origin.unwrap_or(GeoPoint::new(0.0, 0.0));
        NearQuery {
            origin: self.origin,
            limit: self.page_size,
            skip: 0,
        }
    }

    /// Appends a fetched page, returning how many rows were new.
    pub fn append(&mut self, items: Vec<Item>) -> usize {
        self.rows.merge(items).len()
    }

    /// True when `row` is the last loaded row.
    pub fn wants_count_check(&self, row: usize) -> bool {
        !self.rows.is_empty() && row == self.rows.len() - 1
    }

    pub fn next_page(&self, total_count: u64) -> Option<NearQuery> {
        let loaded = self.rows.len();
        if total_count <= loaded as u64 {
            return None;
        }
        Some(NearQuery {
            origin: self.origin,
            limit: self.page_size,
            skip: loaded,
        })
    }

    /// Resets the feed and loads the first page.
    pub async fn refresh(
        &mut self,
        store: &dyn ObjectStore,
        origin: Option<GeoPoint>,
    ) -> Result<usize, StoreError> {
        let query = self.reset(origin);
        let items = store.near(query).await?;
        Ok(self.append(items))
    }

    /// Called as `row` is displayed; loads the next page when `row` is the
    /// last loaded row and the store holds more items. Returns the number of
    /// rows added.
    pub async fn on_row_displayed(
        &mut self,
        store: &dyn ObjectStore,
        row: usize,
    ) -> Result<usize, StoreError> {
        if !self.wants_count_check(row) {
            return Ok(0);
        }
        let total = store.count().await?;
        let Some(query) = self.next_page(total) else {
            return Ok(0);
        };
        debug!(skip = query.skip, limit = query.limit, total, "loading next feed page");
        let items = store.near(query).await?;
        Ok(self.append(items))
    }

    /// Human-readable distance from the feed origin, or `None` when the origin
    /// is unknown.
    pub fn distance_label(&self, item: &Item) -> Option<String> {
        distance_label(self.origin, item.geopoint)
    }
}

/// `"1.2 miles away"` below five miles, `"12 miles away"` otherwise.
///
/// A latitude of exactly zero is treated as "no location fix".
pub fn distance_label(user: GeoPoint, target: GeoPoint) -> Option<String> {
    if user.latitude == 0.0 {
        return None;
    }
    let miles = user.distance_miles(&target);
    if miles < 5.0 {
        Some(format!("{miles:.1} miles away"))
    } else {
        Some(format!("{miles:.0} miles away"))
    }
}
