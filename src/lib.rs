//! Bridge between native Rust code and a script host: embedded UI assets
//! served through a virtual protocol, typed native objects exposed to
//! script, and the navigation and threading rules that tie them together.

pub mod bridge;
pub mod config;
pub mod content;
pub mod error;
pub mod host;
pub mod marshal;
pub mod navigation;
pub mod protocol;
pub mod proxy;
pub mod resources;

pub use bridge::{BridgeController, BridgeHandle, NativeWorker, ObjectScope, RemoteObject};
pub use config::{BridgeConfig, ExecutionModel};
pub use content::{ContentSource, UrlResolver};
pub use error::{BridgeError, Result};
pub use host::{HostEvent, QuickJsHost, ScriptHostAdapter};
pub use protocol::{RequestKind, VirtualProtocolHandler};
pub use proxy::{ClassBuilder, ClassDescriptor, NativeObject, ScriptObject};
pub use resources::{ResourceEntry, ResourceTable};
