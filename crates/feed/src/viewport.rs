use foundation::Region;
use tracing::debug;

use crate::collection::ItemCollection;
use crate::protocol::{FeedConfig, Item};

/// Outcome of a viewport change.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ViewportAction {
    /// The loaded region already covers the viewport.
    NoAction,
    /// Fetch everything inside this (expanded) region.
    FetchRequired(Region),
    /// Too zoomed out to fetch; the loaded region was reset.
    OutOfRange,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ViewportState {
    pub current_region: Region,
    pub loaded_region: Region,
    /// Set once the map reported its first load with a valid location fix.
    pub loaded: bool,
}

/// Decides when the visible map area needs a geo-box fetch.
///
/// The loaded region only grows by replacement: whenever the viewport escapes
/// it, it becomes the viewport scaled by `expansion_factor` around the
/// viewport's center. Small pans inside that margin need no fetch.
#[derive(Debug)]
pub struct ViewportFeedController {
    config: FeedConfig,
    state: ViewportState,
    items: ItemCollection,
}

impl ViewportFeedController {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            state: ViewportState::default(),
            items: ItemCollection::new(),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn items(&self) -> &ItemCollection {
        &self.items
    }

    /// Non-finite and zero-area viewports are ignored by every entry point.
    pub fn accepts(region: &Region) -> bool {
        region.is_finite() && !region.is_empty()
    }

    pub fn on_viewport_changed(&mut self, current: Region) -> ViewportAction {
        if !Self::accepts(&current) {
            debug!(?current, "ignoring degenerate viewport");
            return ViewportAction::NoAction;
        }
        self.state.current_region = current;

        if current.diagonal() > self.config.max_viewport_span {
            debug!(
                span = current.diagonal(),
                max = self.config.max_viewport_span,
                "viewport out of range"
            );
            self.state.loaded_region = Region::SENTINEL;
            return ViewportAction::OutOfRange;
        }

        if self.state.loaded_region.contains(&current) {
            return ViewportAction::NoAction;
        }

        ViewportAction::FetchRequired(self.expand_from(current))
    }

    /// First-load hook. Forces a fetch around `current` the first time it is
    /// called; later calls are no-ops.
    pub fn on_map_loaded(&mut self, current: Region) -> ViewportAction {
        if self.state.loaded {
            return ViewportAction::NoAction;
        }
        if !Self::accepts(&current) {
            debug!(?current, "ignoring degenerate viewport on map load");
            return ViewportAction::NoAction;
        }
        self.state.loaded = true;
        self.state.loaded_region = Region::SENTINEL;
        self.on_viewport_changed(current)
    }

    /// Adds fetched items, skipping identifiers already known. Returns the
    /// items that were new to the session.
    pub fn merge_fetch_results<I>(&mut self, items: I) -> Vec<Item>
    where
        I: IntoIterator<Item = Item>,
    {
        self.items.merge(items)
    }

    /// Forgets every item and the loaded region, then re-evaluates the last
    /// known viewport (which now always needs a fetch unless out of range).
    pub fn reset(&mut self) -> ViewportAction {
        self.items.clear();
        self.state.loaded_region = Region::SENTINEL;

        let current = self.state.current_region;
        if current.is_empty() {
            return ViewportAction::NoAction;
        }
        self.on_viewport_changed(current)
    }

    // Expansion is always computed from the viewport, never from the previous
    // loaded region, so a reset region and a stale one behave the same.
    fn expand_from(&mut self, current: Region) -> Region {
        let expanded = current.scaled(self.config.expansion_factor);
        self.state.loaded_region = expanded;
        debug!(?expanded, "viewport escaped loaded region");
        expanded
    }
}
