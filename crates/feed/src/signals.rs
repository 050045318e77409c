use foundation::Region;

use crate::protocol::{Item, ServerMessage};
use crate::request::FetchId;

/// Presentation-facing signal emitted by a viewport session.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    WarningShown,
    WarningHidden,
    FetchStarted { fetch: FetchId, region: Region },
    ItemsAdded { fetch: FetchId, items: Vec<Item> },
    FetchFailed { fetch: FetchId, message: String },
    Cleared,
}

impl From<FeedSignal> for ServerMessage {
    fn from(signal: FeedSignal) -> Self {
        match signal {
            FeedSignal::WarningShown => ServerMessage::OutOfRange,
            FeedSignal::WarningHidden => ServerMessage::InRange,
            FeedSignal::FetchStarted { fetch, region } => {
                ServerMessage::FetchStarted { fetch, region }
            }
            FeedSignal::ItemsAdded { fetch, items } => ServerMessage::Items { fetch, items },
            FeedSignal::FetchFailed { fetch, message } => {
                ServerMessage::FetchFailed { fetch, message }
            }
            FeedSignal::Cleared => ServerMessage::Cleared,
        }
    }
}

/// Ordered buffer of signals waiting for the presentation sink.
#[derive(Debug, Default)]
pub struct SignalBus {
    signals: Vec<FeedSignal>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    pub fn emit(&mut self, signal: FeedSignal) {
        self.signals.push(signal);
    }

    pub fn signals(&self) -> &[FeedSignal] {
        &self.signals
    }

    pub fn drain(&mut self) -> Vec<FeedSignal> {
        std::mem::take(&mut self.signals)
    }
}
