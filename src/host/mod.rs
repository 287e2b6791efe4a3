//! The seam between the bridge and a concrete script host.

pub mod quickjs;

use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::navigation::{NavigationEvent, NavigationId};
use crate::protocol::VirtualProtocolHandler;
use crate::proxy::ScriptObject;

pub use quickjs::QuickJsHost;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub id: NavigationId,
    pub url: String,
}

/// Notifications a host emits while loading and running pages.
///
/// Navigation events carry the id of the request that caused them when the
/// host can tell; engine-initiated navigations carry `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    BeforeNavigate {
        navigation: Option<NavigationId>,
        url: String,
    },
    NavigateComplete {
        navigation: Option<NavigationId>,
        url: String,
    },
    DocumentComplete {
        navigation: Option<NavigationId>,
        url: String,
    },
    /// The primary document could not be loaded.
    NavigationFailed {
        navigation: Option<NavigationId>,
        url: String,
        error: BridgeError,
    },
    /// A secondary asset could not be loaded; the page keeps loading.
    ResourceFailed { url: String, error: BridgeError },
    /// A page script threw.
    ScriptFailed { source: String, error: BridgeError },
}

impl HostEvent {
    /// The navigation bit this event clears, if any.
    pub fn navigation_event(&self) -> Option<(NavigationEvent, Option<NavigationId>)> {
        match self {
            HostEvent::BeforeNavigate { navigation, .. } => {
                Some((NavigationEvent::BeforeNavigate, *navigation))
            }
            HostEvent::NavigateComplete { navigation, .. } => {
                Some((NavigationEvent::NavigateComplete, *navigation))
            }
            HostEvent::DocumentComplete { navigation, .. } => {
                Some((NavigationEvent::DocumentComplete, *navigation))
            }
            _ => None,
        }
    }
}

/// A document engine the bridge can drive.
///
/// All methods are called on the thread that owns the host.
pub trait ScriptHostAdapter {
    /// Start loading `request.url`. Progress is reported through
    /// `poll_event`; an `Err` means the request could not even be issued.
    fn navigate(&mut self, request: NavigationRequest) -> Result<()>;

    /// Run `script` in the current page and return its completion value
    /// coerced to a string.
    fn eval(&mut self, script: &str) -> Result<String>;

    /// Make `object` reachable as `window.<alias>` in the current page.
    /// The caller evaluates the object's proxy source afterwards.
    fn bind_object(&mut self, object: Arc<dyn ScriptObject>) -> Result<()>;

    fn register_protocol(&mut self, handler: Arc<VirtualProtocolHandler>) -> Result<()>;

    fn unregister_protocol(&mut self, scheme: &str);

    fn poll_event(&mut self) -> Option<HostEvent>;
}
