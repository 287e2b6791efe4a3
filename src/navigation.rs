use std::fmt;

use bitflags::bitflags;
use tracing::debug;

bitflags! {
    /// Navigation events still outstanding for the current navigation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NavigationMask: u8 {
        const BEFORE_NAVIGATE = 0b001;
        const DOCUMENT_COMPLETE = 0b010;
        const NAVIGATE_COMPLETE = 0b100;
    }
}

/// The three events a host emits for every navigation, in no guaranteed
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationEvent {
    BeforeNavigate,
    NavigateComplete,
    DocumentComplete,
}

impl NavigationEvent {
    pub fn bit(self) -> NavigationMask {
        match self {
            NavigationEvent::BeforeNavigate => NavigationMask::BEFORE_NAVIGATE,
            NavigationEvent::NavigateComplete => NavigationMask::NAVIGATE_COMPLETE,
            NavigationEvent::DocumentComplete => NavigationMask::DOCUMENT_COMPLETE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigationId(u64);

impl NavigationId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NavigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nav#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationState {
    Idle,
    Pending {
        id: NavigationId,
        url: String,
        mask: NavigationMask,
    },
    Loaded {
        id: NavigationId,
        url: String,
    },
}

/// Outcome of feeding one host event into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Superseded, duplicated or unrelated to any pending navigation.
    Ignored,
    Progress(NavigationMask),
    Loaded { id: NavigationId, url: String },
}

/// Per-window navigation state machine.
///
/// `begin` resets the mask to all three bits. Events clear their bit; the
/// transition to `Loaded` happens exactly once, when the mask reaches zero.
/// Events tagged with an older navigation id are dropped, which is how a
/// superseded navigation's completion is kept from reporting a load.
#[derive(Debug)]
pub struct NavigationTracker {
    next_id: u64,
    state: NavigationState,
}

impl Default for NavigationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationTracker {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            state: NavigationState::Idle,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, NavigationState::Pending { .. })
    }

    /// Id of the navigation currently pending, if any.
    pub fn pending_id(&self) -> Option<NavigationId> {
        match self.state {
            NavigationState::Pending { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn begin(&mut self, url: impl Into<String>) -> NavigationId {
        let id = NavigationId(self.next_id);
        self.next_id += 1;
        let url = url.into();
        if let NavigationState::Pending { id: previous, .. } = &self.state {
            debug!(target: "navigation", %previous, superseded_by = %id, "navigation superseded");
        }
        debug!(target: "navigation", %id, %url, "navigation started");
        self.state = NavigationState::Pending {
            id,
            url,
            mask: NavigationMask::all(),
        };
        id
    }

    /// Clear the bit for `event`. An untagged event (`navigation == None`)
    /// applies to whatever navigation is pending.
    pub fn on_event(
        &mut self,
        event: NavigationEvent,
        navigation: Option<NavigationId>,
    ) -> Transition {
        let NavigationState::Pending { id, url, mask } = &mut self.state else {
            debug!(target: "navigation", ?event, "event without pending navigation");
            return Transition::Ignored;
        };
        if navigation.is_some_and(|tagged| tagged != *id) {
            debug!(target: "navigation", ?event, current = %id, "stale event ignored");
            return Transition::Ignored;
        }
        let bit = event.bit();
        if !mask.contains(bit) {
            // Bit already clear: the engine re-announced its own navigation.
            debug!(target: "navigation", ?event, %id, "duplicate event ignored");
            return Transition::Ignored;
        }
        mask.remove(bit);
        if !mask.is_empty() {
            return Transition::Progress(*mask);
        }

        let id = *id;
        let url = std::mem::take(url);
        debug!(target: "navigation", %id, %url, "navigation loaded");
        self.state = NavigationState::Loaded {
            id,
            url: url.clone(),
        };
        Transition::Loaded { id, url }
    }

    /// Abandon the pending navigation. Returns its url when `navigation`
    /// refers to it.
    pub fn fail(&mut self, navigation: Option<NavigationId>) -> Option<(NavigationId, String)> {
        let NavigationState::Pending { id, url, .. } = &self.state else {
            return None;
        };
        if navigation.is_some_and(|tagged| tagged != *id) {
            return None;
        }
        let failed = (*id, url.clone());
        self.state = NavigationState::Idle;
        Some(failed)
    }
}
