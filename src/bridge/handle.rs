use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::trace;

use super::queue::CommandQueue;
use super::ObjectScope;
use crate::error::Result;
use crate::proxy::ScriptObject;

pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Waker shared between a controller and every handle it gave out, so a
/// waker installed later still reaches older handles.
pub(crate) type WakerSlot = Arc<Mutex<Option<Waker>>>;

/// Work posted to the host thread.
pub enum HostCommand {
    Eval {
        script: String,
        reply: Option<oneshot::Sender<Result<String>>>,
    },
    Go {
        url: String,
    },
    AddObject {
        object: Arc<dyn ScriptObject>,
        scope: ObjectScope,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Close,
}

impl HostCommand {
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::Eval { .. } => "eval",
            HostCommand::Go { .. } => "go",
            HostCommand::AddObject { .. } => "add_object",
            HostCommand::Close => "close",
        }
    }
}

impl std::fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostCommand::Eval { script, .. } => f.debug_struct("Eval").field("script", script).finish(),
            HostCommand::Go { url } => f.debug_struct("Go").field("url", url).finish(),
            HostCommand::AddObject { object, scope, .. } => f
                .debug_struct("AddObject")
                .field("object", &object.exposed_name())
                .field("scope", scope)
                .finish(),
            HostCommand::Close => f.write_str("Close"),
        }
    }
}

/// Thread-safe handle for driving a window from native code that does not
/// own the script host.
///
/// Commands run on the host thread in the order they were posted.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: Arc<CommandQueue<HostCommand>>,
    waker: WakerSlot,
}

impl BridgeHandle {
    pub(crate) fn new(commands: Arc<CommandQueue<HostCommand>>, waker: WakerSlot) -> Self {
        Self { commands, waker }
    }

    fn current_waker(&self) -> Option<Waker> {
        self.waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn post(&self, command: HostCommand) -> Result<()> {
        trace!(target: "bridge", command = command.name(), "posting host command");
        self.commands.push(command)?;
        if let Some(waker) = self.current_waker() {
            waker();
        }
        Ok(())
    }

    /// Fire-and-forget evaluation; failures go to the window's error
    /// callback.
    pub fn eval(&self, script: impl Into<String>) -> Result<()> {
        self.post(HostCommand::Eval {
            script: script.into(),
            reply: None,
        })
    }

    pub fn eval_with_reply(
        &self,
        script: impl Into<String>,
    ) -> Result<oneshot::Receiver<Result<String>>> {
        let (tx, rx) = oneshot::channel();
        self.post(HostCommand::Eval {
            script: script.into(),
            reply: Some(tx),
        })?;
        Ok(rx)
    }

    pub fn go(&self, url: impl Into<String>) -> Result<()> {
        self.post(HostCommand::Go { url: url.into() })
    }

    pub fn add_object(
        &self,
        object: Arc<dyn ScriptObject>,
        scope: ObjectScope,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let (tx, rx) = oneshot::channel();
        self.post(HostCommand::AddObject {
            object,
            scope,
            reply: Some(tx),
        })?;
        Ok(rx)
    }

    pub fn close(&self) -> Result<()> {
        self.post(HostCommand::Close)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("commands", &self.commands)
            .field("waker", &self.current_waker().is_some())
            .finish()
    }
}
