use std::collections::BTreeMap;

use foundation::{GeoBox, GeoPoint, Region, UserId};
use tracing::{debug, warn};

use crate::collection::ItemCollection;
use crate::protocol::{FeedConfig, Item};
use crate::request::{FetchId, FetchState};
use crate::signals::{FeedSignal, SignalBus};
use crate::store::{ObjectStore, StoreError};
use crate::viewport::{ViewportAction, ViewportFeedController, ViewportState};

/// Why the "add new item" action is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddItemDenied {
    NotLoggedIn,
    NoLocationFix,
}

impl std::fmt::Display for AddItemDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddItemDenied::NotLoggedIn => {
                write!(f, "only registered users can add new locations")
            }
            AddItemDenied::NoLocationFix => {
                write!(f, "a location fix is required to submit new locations")
            }
        }
    }
}

impl std::error::Error for AddItemDenied {}

/// Per-session context, created on activation and passed explicitly.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub current_user: Option<UserId>,
    pub location_fix: Option<GeoPoint>,
}

impl SessionContext {
    pub fn new(current_user: Option<UserId>, location_fix: Option<GeoPoint>) -> Self {
        Self {
            current_user,
            location_fix,
        }
    }

    /// A fix at latitude zero is what an unavailable location reports.
    pub fn has_location_fix(&self) -> bool {
        self.location_fix
            .is_some_and(|p| p.latitude != 0.0 && p.is_valid())
    }

    pub fn check_can_add_item(&self) -> Result<&UserId, AddItemDenied> {
        let Some(user) = self.current_user.as_ref() else {
            return Err(AddItemDenied::NotLoggedIn);
        };
        if !self.has_location_fix() {
            return Err(AddItemDenied::NoLocationFix);
        }
        Ok(user)
    }
}

/// Finished fetches remembered for `fetch_state`; older ones are forgotten.
const FINISHED_HISTORY: usize = 32;

/// A geo-box fetch the owner of the session must run against the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOrder {
    pub id: FetchId,
    pub region: Region,
    pub bounds: GeoBox,
}

impl FetchOrder {
    /// Runs the fetch and pairs the outcome with the order's id, ready for
    /// `ViewportSession::complete_fetch`.
    pub async fn run(
        self,
        store: &dyn ObjectStore,
    ) -> (FetchId, Result<Vec<Item>, StoreError>) {
        (self.id, store.within_box(self.bounds).await)
    }
}

/// Single-owner orchestration of a viewport controller, its in-flight
/// fetches, and the presentation signals they produce.
///
/// Fetches are not cancelled or serialized: several may be in flight at once
/// and complete in any order. Merging is idempotent per item id, so
/// completion order does not matter.
#[derive(Debug)]
pub struct ViewportSession {
    controller: ViewportFeedController,
    signals: SignalBus,
    next_fetch: u64,
    fetches: BTreeMap<FetchId, FetchState>,
    warning_visible: bool,
}

impl ViewportSession {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            controller: ViewportFeedController::new(config),
            signals: SignalBus::new(),
            next_fetch: 1,
            fetches: BTreeMap::new(),
            warning_visible: false,
        }
    }

    pub fn state(&self) -> ViewportState {
        self.controller.state()
    }

    pub fn items(&self) -> &ItemCollection {
        self.controller.items()
    }

    pub fn warning_visible(&self) -> bool {
        self.warning_visible
    }

    pub fn fetch_state(&self, id: FetchId) -> Option<FetchState> {
        self.fetches.get(&id).copied()
    }

    pub fn in_flight(&self) -> usize {
        self.fetches.values().filter(|s| !s.is_finished()).count()
    }

    pub fn signals(&self) -> &[FeedSignal] {
        self.signals.signals()
    }

    pub fn drain_signals(&mut self) -> Vec<FeedSignal> {
        self.signals.drain()
    }

    pub fn on_viewport_changed(&mut self, region: Region) -> Option<FetchOrder> {
        let action = self.controller.on_viewport_changed(region);
        if !ViewportFeedController::accepts(&region) {
            return None;
        }
        self.apply(action)
    }

    pub fn on_map_loaded(&mut self, region: Region) -> Option<FetchOrder> {
        let action = self.controller.on_map_loaded(region);
        if !ViewportFeedController::accepts(&region) {
            return None;
        }
        self.apply(action)
    }

    pub fn reset(&mut self) -> Option<FetchOrder> {
        let action = self.controller.reset();
        self.signals.emit(FeedSignal::Cleared);
        self.apply(action)
    }

    /// Records that the owner handed the fetch to the store.
    pub fn mark_in_flight(&mut self, id: FetchId) {
        if let Some(state) = self.fetches.get_mut(&id) {
            *state = FetchState::InFlight;
        }
    }

    /// Merges a finished fetch. A failure counts as "no items"; the loaded
    /// region is left advanced. Returns the items new to the session.
    pub fn complete_fetch(
        &mut self,
        id: FetchId,
        result: Result<Vec<Item>, StoreError>,
    ) -> Vec<Item> {
        let added = self.finish_fetch(id, result);
        self.forget_finished();
        added
    }

    fn finish_fetch(&mut self, id: FetchId, result: Result<Vec<Item>, StoreError>) -> Vec<Item> {
        match result {
            Ok(items) => {
                self.fetches.insert(id, FetchState::Completed);
                let added = self.controller.merge_fetch_results(items);
                debug!(%id, added = added.len(), "fetch merged");
                if !added.is_empty() {
                    self.signals.emit(FeedSignal::ItemsAdded {
                        fetch: id,
                        items: added.clone(),
                    });
                }
                added
            }
            Err(err) => {
                self.fetches.insert(id, FetchState::Failed);
                warn!(%id, "fetch failed: {err}");
                self.signals.emit(FeedSignal::FetchFailed {
                    fetch: id,
                    message: err.to_string(),
                });
                Vec::new()
            }
        }
    }

    // Ids grow monotonically, so the oldest finished fetches come first.
    fn forget_finished(&mut self) {
        let finished = self.fetches.values().filter(|s| s.is_finished()).count();
        let mut excess = finished.saturating_sub(FINISHED_HISTORY);
        self.fetches.retain(|_, state| {
            if excess > 0 && state.is_finished() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    fn apply(&mut self, action: ViewportAction) -> Option<FetchOrder> {
        match action {
            ViewportAction::OutOfRange => {
                // Before the first map load the banner stays hidden.
                if self.controller.state().loaded && !self.warning_visible {
                    self.warning_visible = true;
                    self.signals.emit(FeedSignal::WarningShown);
                }
                None
            }
            ViewportAction::NoAction => {
                self.hide_warning();
                None
            }
            ViewportAction::FetchRequired(region) => {
                self.hide_warning();
                let id = FetchId(self.next_fetch);
                self.next_fetch += 1;
                self.fetches.insert(id, FetchState::Requested);
                self.signals.emit(FeedSignal::FetchStarted { fetch: id, region });
                Some(FetchOrder {
                    id,
                    region,
                    bounds: region.to_geo_box(),
                })
            }
        }
    }

    fn hide_warning(&mut self) {
        if self.warning_visible {
            self.warning_visible = false;
            self.signals.emit(FeedSignal::WarningHidden);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddItemDenied, FINISHED_HISTORY, SessionContext, ViewportSession};
    use crate::request::FetchId;
    use crate::collection::tests::item_at;
    use crate::protocol::FeedConfig;
    use crate::request::FetchState;
    use crate::signals::FeedSignal;
    use crate::store::{MemoryStore, StoreError};
    use foundation::{GeoBox, GeoPoint, MapPoint, Region, UserId};

    fn config() -> FeedConfig {
        FeedConfig {
            max_viewport_span: 1_000_000.0,
            ..FeedConfig::default()
        }
    }

    /// Map-plane viewport covering the given geographic box.
    fn viewport(sw: (f64, f64), ne: (f64, f64)) -> Region {
        let geo = GeoBox::new(GeoPoint::new(sw.0, sw.1), GeoPoint::new(ne.0, ne.1)).unwrap();
        Region::from_geo_box(&geo)
    }

    #[test]
    fn add_item_requires_user_and_fix() {
        let anon = SessionContext::new(None, Some(GeoPoint::new(40.0, -74.0)));
        assert_eq!(anon.check_can_add_item(), Err(AddItemDenied::NotLoggedIn));

        let no_fix = SessionContext::new(Some(UserId::new("u1")), Some(GeoPoint::new(0.0, 3.0)));
        assert_eq!(no_fix.check_can_add_item(), Err(AddItemDenied::NoLocationFix));

        let missing = SessionContext::new(Some(UserId::new("u1")), None);
        assert_eq!(missing.check_can_add_item(), Err(AddItemDenied::NoLocationFix));

        let ok = SessionContext::new(Some(UserId::new("u1")), Some(GeoPoint::new(40.0, -74.0)));
        assert_eq!(ok.check_can_add_item(), Ok(&UserId::new("u1")));
    }

    #[test]
    fn fetch_ids_are_unique_and_tracked() {
        let mut s = ViewportSession::new(config());
        let a = s
            .on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0))
            .expect("fetch");
        let b = s
            .on_viewport_changed(Region::new(100.0, 0.0, 110.0, 10.0))
            .expect("fetch");
        assert_ne!(a.id, b.id);
        assert_eq!(s.fetch_state(a.id), Some(FetchState::Requested));

        s.mark_in_flight(a.id);
        s.mark_in_flight(b.id);
        assert_eq!(s.in_flight(), 2);

        s.complete_fetch(b.id, Ok(Vec::new()));
        assert_eq!(s.fetch_state(b.id), Some(FetchState::Completed));
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn failed_fetch_keeps_loaded_region() {
        let mut s = ViewportSession::new(config());
        let order = s
            .on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0))
            .expect("fetch");
        let added = s.complete_fetch(order.id, Err(StoreError::new("offline")));

        assert!(added.is_empty());
        assert_eq!(s.fetch_state(order.id), Some(FetchState::Failed));
        assert_eq!(s.state().loaded_region, order.region);
        assert!(s.signals().iter().any(|sig| matches!(
            sig,
            FeedSignal::FetchFailed { message, .. } if message == "offline"
        )));

        // The same viewport is considered loaded; no refetch.
        assert!(s.on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn warning_only_after_map_loaded_and_only_on_change() {
        let mut s = ViewportSession::new(config());
        let huge = Region::new(0.0, 0.0, 2_000_000.0, 2_000_000.0);

        s.on_viewport_changed(huge);
        assert!(!s.warning_visible());

        s.on_map_loaded(Region::new(0.0, 0.0, 10.0, 10.0));
        s.drain_signals();

        s.on_viewport_changed(huge);
        s.on_viewport_changed(huge);
        assert!(s.warning_visible());
        assert_eq!(s.drain_signals(), vec![FeedSignal::WarningShown]);

        let order = s.on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0));
        assert!(order.is_some());
        let signals = s.drain_signals();
        assert_eq!(signals[0], FeedSignal::WarningHidden);
        assert!(matches!(signals[1], FeedSignal::FetchStarted { .. }));
    }

    #[tokio::test]
    async fn fetch_orders_query_the_expanded_geo_box() {
        let store = MemoryStore::with_contents(
            vec![
                item_at("inside", "Inside", GeoPoint::new(40.5, -74.5)),
                item_at("margin", "Margin", GeoPoint::new(41.2, -74.5)),
                item_at("outside", "Outside", GeoPoint::new(45.0, -74.5)),
            ],
            Vec::new(),
        );
        let mut s = ViewportSession::new(FeedConfig::default());

        let order = s
            .on_viewport_changed(viewport((40.0, -75.0), (41.0, -74.0)))
            .expect("fetch");
        let center = MapPoint::from_geo(GeoPoint::new(40.5, -74.5));
        assert!(order.region.contains_point(center));

        let (id, result) = order.run(&store).await;
        let added = s.complete_fetch(id, result);
        let ids: Vec<&str> = added.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["inside", "margin"]);
    }

    #[test]
    fn reset_emits_cleared_and_refetches() {
        let mut s = ViewportSession::new(config());
        let first = s
            .on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0))
            .expect("fetch");
        s.complete_fetch(
            first.id,
            Ok(vec![item_at("a", "A", GeoPoint::new(1.0, 1.0))]),
        );
        s.drain_signals();

        let again = s.reset().expect("refetch after reset");
        assert_eq!(again.region, first.region);
        assert_ne!(again.id, first.id);
        assert!(s.items().is_empty());
        assert_eq!(s.drain_signals()[0], FeedSignal::Cleared);
    }

    #[test]
    fn finished_fetch_history_stays_bounded() {
        let mut s = ViewportSession::new(config());
        let mut last = None;
        for i in 0..10_000 {
            let x = i as f64 * 100.0;
            let order = s
                .on_viewport_changed(Region::new(x, 0.0, x + 10.0, 10.0))
                .expect("fetch");
            s.mark_in_flight(order.id);
            s.complete_fetch(order.id, Ok(Vec::new()));
            last = Some(order.id);
        }

        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.fetches.len(), FINISHED_HISTORY);
        assert_eq!(s.fetch_state(FetchId(1)), None);
        assert_eq!(s.fetch_state(last.unwrap()), Some(FetchState::Completed));
    }

    #[test]
    fn in_flight_fetches_survive_history_trimming() {
        let mut s = ViewportSession::new(config());
        let pending = s
            .on_viewport_changed(Region::new(0.0, 0.0, 10.0, 10.0))
            .expect("fetch");
        s.mark_in_flight(pending.id);

        for i in 1..=(FINISHED_HISTORY as u64 * 2) {
            let x = i as f64 * 100.0;
            let order = s
                .on_viewport_changed(Region::new(x, 0.0, x + 10.0, 10.0))
                .expect("fetch");
            s.complete_fetch(order.id, Err(StoreError::new("offline")));
        }

        assert_eq!(s.fetch_state(pending.id), Some(FetchState::InFlight));
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn degenerate_viewport_keeps_warning() {
        let mut s = ViewportSession::new(config());
        s.on_map_loaded(Region::new(0.0, 0.0, 10.0, 10.0));
        s.on_viewport_changed(Region::new(0.0, 0.0, 2_000_000.0, 2_000_000.0));
        assert!(s.warning_visible());
        s.drain_signals();

        assert!(s.on_viewport_changed(Region::new(5.0, 5.0, 5.0, 9.0)).is_none());
        assert!(s
            .on_viewport_changed(Region::new(0.0, 0.0, f64::NAN, 10.0))
            .is_none());
        assert!(s.warning_visible());
        assert!(s.drain_signals().is_empty());
    }
}
