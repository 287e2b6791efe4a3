use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::handle::{BridgeHandle, HostCommand, WakerSlot};
use super::queue::CommandQueue;
use super::worker::NativeWorker;
use super::ObjectScope;
use crate::config::{BridgeConfig, ExecutionModel};
use crate::content::{ContentSource, UrlResolver};
use crate::error::{BridgeError, Result};
use crate::host::{HostEvent, NavigationRequest, ScriptHostAdapter};
use crate::marshal::support_script;
use crate::navigation::{NavigationId, NavigationState, NavigationTracker, Transition};
use crate::protocol::VirtualProtocolHandler;
use crate::proxy::{ClassDescriptor, ScriptObject};

type LoadCallback<A> = Box<dyn FnMut(&mut BridgeController<A>, &str)>;
type ErrorCallback = Box<dyn FnMut(&BridgeError)>;

struct Registered {
    object: Arc<dyn ScriptObject>,
    scope: ObjectScope,
    /// Set once the object has been bound into a loaded page.
    bound: bool,
}

impl Registered {
    /// Page objects leave with the page they were bound to. One that has
    /// not reached a page yet waits for the next load.
    fn outlives_page(&self) -> bool {
        self.scope == ObjectScope::Persistent || !self.bound
    }

    fn occupies(&self, slot: &str) -> bool {
        self.object.exposed_name() == slot || self.object.alias() == slot
    }
}

struct ClassSource {
    name: String,
    source: String,
}

/// Owns one window's script host and everything bound into it.
///
/// All methods run on the thread that owns the host. Other threads talk to
/// the window through a `BridgeHandle`; their commands run in `pump` or
/// `run`.
pub struct BridgeController<A: ScriptHostAdapter> {
    adapter: A,
    config: BridgeConfig,
    resolver: UrlResolver,
    protocol: Option<Arc<VirtualProtocolHandler>>,
    protocol_registered: bool,
    objects: Vec<Registered>,
    classes: Vec<ClassSource>,
    navigation: NavigationTracker,
    has_loaded: bool,
    commands: Arc<CommandQueue<HostCommand>>,
    waker: WakerSlot,
    worker: Option<NativeWorker>,
    on_load: Option<LoadCallback<A>>,
    on_error: Option<ErrorCallback>,
    closed: bool,
}

impl<A: ScriptHostAdapter> BridgeController<A> {
    pub fn new(adapter: A, config: BridgeConfig) -> Result<Self> {
        let worker = match config.execution {
            ExecutionModel::Split => Some(NativeWorker::spawn("wui-native", config.call_timeout())?),
            ExecutionModel::CoLocated => None,
        };
        let resolver = UrlResolver::new(ContentSource::Standard, config.resource_root());
        Ok(Self {
            adapter,
            config,
            resolver,
            protocol: None,
            protocol_registered: false,
            objects: Vec::new(),
            classes: Vec::new(),
            navigation: NavigationTracker::new(),
            has_loaded: false,
            commands: Arc::new(CommandQueue::new()),
            waker: Arc::default(),
            worker,
            on_load: None,
            on_error: None,
            closed: false,
        })
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn content_source(&self) -> &ContentSource {
        self.resolver.source()
    }

    pub fn navigation_state(&self) -> &NavigationState {
        self.navigation.state()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.navigation.state(), NavigationState::Loaded { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Choose where pages come from. Fixed once a page has loaded.
    pub fn set_content_source(&mut self, source: ContentSource) -> Result<()> {
        if self.has_loaded {
            return Err(BridgeError::ContentSourceLocked);
        }
        self.unregister_protocol();
        self.protocol = match &source {
            ContentSource::Embedded(table) => {
                Some(Arc::new(VirtualProtocolHandler::new(Arc::clone(table))))
            }
            ContentSource::Resource(_) | ContentSource::Standard => None,
        };
        debug!(target: "bridge", source = source.kind(), "content source set");
        self.resolver = UrlResolver::new(source, self.config.resource_root());
        if !self.closed && self.protocol.is_some() {
            self.register_protocol()?;
        }
        Ok(())
    }

    /// Install the protocol handler ahead of the first navigation.
    pub fn open(&mut self) -> Result<()> {
        if self.closed {
            return Err(BridgeError::Disconnected);
        }
        self.register_protocol()
    }

    /// Tear the window down: the protocol handler is unregistered, queued
    /// commands are dropped and the native worker is stopped.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.unregister_protocol();
        self.commands.close();
        let dropped = self.commands.drain().len();
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        info!(target: "bridge", dropped_commands = dropped, "window closed");
    }

    fn register_protocol(&mut self) -> Result<()> {
        if self.protocol_registered {
            return Ok(());
        }
        if let Some(handler) = &self.protocol {
            self.adapter.register_protocol(Arc::clone(handler))?;
            self.protocol_registered = true;
        }
        Ok(())
    }

    fn unregister_protocol(&mut self) {
        if !self.protocol_registered {
            return;
        }
        if let Some(handler) = &self.protocol {
            self.adapter.unregister_protocol(handler.scheme());
        }
        self.protocol_registered = false;
    }

    /// Navigate to `url`, resolved against the content source.
    ///
    /// Page-scoped objects bound to the current page are dropped. Completion is reported to the load
    /// callback once all three navigation events have been seen.
    pub fn go(&mut self, url: &str) -> Result<NavigationId> {
        self.open()?;
        let resolved = self.resolver.resolve(url)?;
        self.objects.retain(Registered::outlives_page);
        let id = self.navigation.begin(resolved.clone());
        info!(target: "bridge", %id, %url, %resolved, "go");
        if let Err(err) = self.adapter.navigate(NavigationRequest { id, url: resolved }) {
            self.navigation.fail(Some(id));
            return Err(err);
        }
        Ok(id)
    }

    /// Evaluate `script`, reporting failures to the error callback.
    pub fn eval(&mut self, script: &str) {
        if let Err(err) = self.try_eval(script) {
            self.report(err);
        }
    }

    /// Evaluate `script` and return its completion value as a string.
    pub fn try_eval(&mut self, script: &str) -> Result<String> {
        debug!(target: "bridge", length = script.len(), "eval");
        self.adapter.eval(script)
    }

    pub fn add_object<O>(&mut self, object: O, scope: ObjectScope) -> Result<()>
    where
        O: ScriptObject + 'static,
    {
        self.add_shared(Arc::new(object), scope)
    }

    /// Register `object` as `window.<exposed_name>`. Binds immediately when
    /// a page is loaded; otherwise at the next completed load.
    pub fn add_shared(&mut self, object: Arc<dyn ScriptObject>, scope: ObjectScope) -> Result<()> {
        object.check()?;
        let taken = self.objects.iter().any(|registered| {
            registered.occupies(object.exposed_name()) || registered.occupies(object.alias())
        });
        if taken {
            return Err(BridgeError::DuplicateRegistration {
                name: object.exposed_name().to_string(),
            });
        }

        let object: Arc<dyn ScriptObject> = match &self.worker {
            Some(worker) => Arc::new(worker.remote(object)),
            None => object,
        };
        debug!(target: "bridge", name = object.exposed_name(), ?scope, "object registered");
        let loaded = self.is_loaded();
        self.objects.push(Registered {
            object: Arc::clone(&object),
            scope,
            bound: loaded,
        });
        if loaded {
            self.bind(&object)?;
        }
        Ok(())
    }

    /// Define the proxy constructor for a native type in every page.
    pub fn add_class<T>(&mut self, descriptor: &ClassDescriptor<T>) -> Result<()> {
        if let Some(existing) = self
            .classes
            .iter()
            .find(|class| class.name == descriptor.name())
        {
            if existing.source == descriptor.source() {
                return Ok(());
            }
            return Err(BridgeError::DuplicateRegistration {
                name: descriptor.constructor_name(),
            });
        }
        self.classes.push(ClassSource {
            name: descriptor.name().to_string(),
            source: descriptor.source().to_string(),
        });
        if self.is_loaded() {
            self.adapter.eval(descriptor.source())?;
        }
        Ok(())
    }

    /// Expose a shared instance of a described type as `window.<name>`.
    pub fn set_object<T: Send + 'static>(
        &mut self,
        descriptor: &Arc<ClassDescriptor<T>>,
        name: &str,
        instance: Arc<Mutex<T>>,
        scope: ObjectScope,
    ) -> Result<()> {
        self.add_class(descriptor)?;
        let bound = descriptor.bind(name, instance)?;
        self.add_object(bound, scope)
    }

    pub fn get_object(&self, name: &str) -> Option<Arc<dyn ScriptObject>> {
        self.objects
            .iter()
            .find(|registered| registered.object.exposed_name() == name)
            .map(|registered| Arc::clone(&registered.object))
    }

    /// Forget `name`. The current page keeps its binding until it unloads.
    pub fn remove_object(&mut self, name: &str) -> Option<Arc<dyn ScriptObject>> {
        let index = self
            .objects
            .iter()
            .position(|registered| registered.object.exposed_name() == name)?;
        Some(self.objects.remove(index).object)
    }

    /// Call an operation from native code, exactly as the proxy would.
    pub fn invoke(&self, name: &str, operation: &str, args: &[String]) -> Result<String> {
        let object = self
            .get_object(name)
            .ok_or_else(|| BridgeError::UnknownObject(name.to_string()))?;
        object.invoke(operation, args)
    }

    pub fn on_load<F>(&mut self, callback: F)
    where
        F: FnMut(&mut BridgeController<A>, &str) + 'static,
    {
        self.on_load = Some(Box::new(callback));
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(&BridgeError) + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Called by handles after posting, so an event loop can schedule
    /// `pump` on the host thread. Applies to handles created before and
    /// after this call.
    pub fn set_waker<F>(&mut self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle::new(Arc::clone(&self.commands), Arc::clone(&self.waker))
    }

    /// Run queued commands and host events until both are empty. Returns
    /// how many were handled.
    ///
    /// Host events are drained after every command, so a posted `go` has
    /// completed its load before the next command runs.
    pub fn pump(&mut self) -> usize {
        let mut handled = self.drain_events();
        while !self.closed {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            self.handle_command(command);
            handled += 1 + self.drain_events();
        }
        handled
    }

    fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.adapter.poll_event() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Serve commands until the window is closed.
    pub fn run(&mut self) {
        info!(target: "bridge", "host loop started");
        while !self.closed {
            self.pump();
            if self.closed {
                break;
            }
            match self.commands.wait_pop(None) {
                Some(command) => self.handle_command(command),
                None => break,
            }
        }
        info!(target: "bridge", "host loop stopped");
    }

    fn handle_command(&mut self, command: HostCommand) {
        debug!(target: "bridge", command = command.name(), "host command");
        match command {
            HostCommand::Eval { script, reply } => {
                let result = self.try_eval(&script);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            self.report(err);
                        }
                    }
                }
            }
            HostCommand::Go { url } => {
                if let Err(err) = self.go(&url) {
                    self.report(err);
                }
            }
            HostCommand::AddObject {
                object,
                scope,
                reply,
            } => {
                let result = self.add_shared(object, scope);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            self.report(err);
                        }
                    }
                }
            }
            HostCommand::Close => self.close(),
        }
    }

    /// Feed one host event through the navigation state machine.
    pub fn handle_event(&mut self, event: HostEvent) {
        if let Some((kind, navigation)) = event.navigation_event() {
            if let Transition::Loaded { url, .. } = self.navigation.on_event(kind, navigation) {
                self.complete_load(&url);
            }
            return;
        }

        match event {
            HostEvent::NavigationFailed {
                navigation,
                url,
                error,
            } => match self.navigation.fail(navigation) {
                Some((id, _)) => {
                    warn!(target: "navigation", %id, %url, error = %error, "navigation failed");
                    self.report(error);
                }
                None => {
                    debug!(target: "navigation", %url, "failure of superseded navigation ignored");
                }
            },
            HostEvent::ResourceFailed { url, error } => {
                warn!(target: "bridge", %url, error = %error, "page resource failed");
                self.report(error);
            }
            HostEvent::ScriptFailed { source, error } => {
                warn!(target: "bridge", %source, error = %error, "page script failed");
                self.report(error);
            }
            HostEvent::BeforeNavigate { .. }
            | HostEvent::NavigateComplete { .. }
            | HostEvent::DocumentComplete { .. } => {}
        }
    }

    fn complete_load(&mut self, url: &str) {
        self.has_loaded = true;

        if let Err(err) = self.adapter.eval(&support_script()) {
            self.report(err);
        }
        let sources: Vec<String> = self.classes.iter().map(|class| class.source.clone()).collect();
        for source in sources {
            if let Err(err) = self.adapter.eval(&source) {
                self.report(err);
            }
        }
        let objects: Vec<Arc<dyn ScriptObject>> = self
            .objects
            .iter_mut()
            .map(|registered| {
                registered.bound = true;
                Arc::clone(&registered.object)
            })
            .collect();
        for object in objects {
            if let Err(err) = self.bind(&object) {
                self.report(err);
            }
        }

        let path = self.resolver.logical_path(url);
        info!(target: "bridge", %path, "page loaded");
        if let Some(mut callback) = self.on_load.take() {
            callback(self, &path);
            if self.on_load.is_none() {
                self.on_load = Some(callback);
            }
        }
    }

    fn bind(&mut self, object: &Arc<dyn ScriptObject>) -> Result<()> {
        self.adapter.bind_object(Arc::clone(object))?;
        self.adapter.eval(&object.proxy_source())?;
        debug!(target: "bridge", name = object.exposed_name(), "object bound");
        Ok(())
    }

    fn report(&mut self, err: BridgeError) {
        warn!(target: "bridge", error = %err, "bridge error");
        if let Some(callback) = self.on_error.as_mut() {
            callback(&err);
        }
    }
}

impl<A: ScriptHostAdapter> Drop for BridgeController<A> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use crate::navigation::NavigationId;
    use crate::proxy::NativeObject;
    use crate::resources::ResourceTable;

    /// Records what the controller asks of it; events are pushed by hand.
    #[derive(Default)]
    struct ScriptedHost {
        navigations: Vec<NavigationRequest>,
        evals: Vec<String>,
        bound: Vec<String>,
        protocols: Vec<String>,
        events: VecDeque<HostEvent>,
    }

    impl ScriptHostAdapter for ScriptedHost {
        fn navigate(&mut self, request: NavigationRequest) -> Result<()> {
            self.navigations.push(request);
            Ok(())
        }

        fn eval(&mut self, script: &str) -> Result<String> {
            self.evals.push(script.to_string());
            if script.contains("throw") {
                return Err(BridgeError::ScriptEvaluation("thrown".into()));
            }
            Ok(String::new())
        }

        fn bind_object(&mut self, object: Arc<dyn ScriptObject>) -> Result<()> {
            self.bound.push(object.exposed_name().to_string());
            Ok(())
        }

        fn register_protocol(&mut self, handler: Arc<VirtualProtocolHandler>) -> Result<()> {
            self.protocols.push(handler.scheme().to_string());
            Ok(())
        }

        fn unregister_protocol(&mut self, scheme: &str) {
            self.protocols.retain(|registered| registered != scheme);
        }

        fn poll_event(&mut self) -> Option<HostEvent> {
            self.events.pop_front()
        }
    }

    fn embedded_controller() -> BridgeController<ScriptedHost> {
        let table = ResourceTable::builder()
            .insert("index.html", &b"<html></html>"[..])
            .expect("insert")
            .build();
        let mut controller =
            BridgeController::new(ScriptedHost::default(), BridgeConfig::default()).expect("controller");
        controller
            .set_content_source(ContentSource::Embedded(Arc::new(table)))
            .expect("source");
        controller
    }

    fn complete(controller: &mut BridgeController<ScriptedHost>, id: NavigationId) {
        let url = controller.adapter().navigations.last().expect("navigation").url.clone();
        let events = [
            HostEvent::BeforeNavigate {
                navigation: Some(id),
                url: url.clone(),
            },
            HostEvent::DocumentComplete {
                navigation: Some(id),
                url: url.clone(),
            },
            HostEvent::NavigateComplete {
                navigation: Some(id),
                url,
            },
        ];
        controller.adapter_mut().events.extend(events);
        controller.pump();
    }

    #[test]
    fn load_injects_support_then_objects_then_notifies() {
        let mut controller = embedded_controller();
        let loads = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&loads);
        controller.on_load(move |controller, path| {
            sink.borrow_mut().push(path.to_string());
            controller.eval("onload()");
        });
        controller
            .add_object(
                NativeObject::new("napp").expect("object").function("send", |_: String| {}),
                ObjectScope::Persistent,
            )
            .expect("add");

        let id = controller.go("index.html").expect("go");
        assert_eq!(controller.adapter().protocols, vec!["embedded"]);
        assert_eq!(
            controller.adapter().navigations[0].url,
            "embedded://app/index.html"
        );
        complete(&mut controller, id);

        assert_eq!(*loads.borrow(), vec![String::from("index.html")]);
        let evals = &controller.adapter().evals;
        assert!(evals[0].contains("_wui_convertFromNative"));
        assert!(evals[1].starts_with("window.napp = new"));
        assert_eq!(evals[2], "onload()");
        assert_eq!(controller.adapter().bound, vec!["napp"]);
    }

    #[test]
    fn superseded_navigation_reports_once() {
        let mut controller = embedded_controller();
        let loads = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&loads);
        controller.on_load(move |_, _| *counter.borrow_mut() += 1);

        let first = controller.go("index.html").expect("go");
        let second = controller.go("index.html").expect("go");
        complete(&mut controller, first);
        assert_eq!(*loads.borrow(), 0);
        complete(&mut controller, second);
        complete(&mut controller, second);
        assert_eq!(*loads.borrow(), 1);
    }

    #[test]
    fn content_source_locks_after_load() {
        let mut controller = embedded_controller();
        let id = controller.go("index.html").expect("go");
        complete(&mut controller, id);
        assert_eq!(
            controller.set_content_source(ContentSource::Standard),
            Err(BridgeError::ContentSourceLocked)
        );
        assert_eq!(controller.adapter().protocols, vec!["embedded"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut controller = embedded_controller();
        controller
            .add_object(NativeObject::new("napp").expect("object"), ObjectScope::Page)
            .expect("first");
        assert_eq!(
            controller.add_object(NativeObject::new("napp").expect("object"), ObjectScope::Page),
            Err(BridgeError::DuplicateRegistration {
                name: "napp".into()
            })
        );
        assert!(matches!(
            controller.invoke("nobody", "x", &[]),
            Err(BridgeError::UnknownObject(_))
        ));
    }

    #[test]
    fn page_objects_leave_with_their_page() {
        let mut controller = embedded_controller();
        controller
            .add_object(NativeObject::new("page").expect("object"), ObjectScope::Page)
            .expect("page");
        controller
            .add_object(NativeObject::new("app").expect("object"), ObjectScope::Persistent)
            .expect("app");

        // Not bound anywhere yet, so the first navigation keeps it.
        let id = controller.go("index.html").expect("go");
        assert!(controller.get_object("page").is_some());
        complete(&mut controller, id);
        assert_eq!(controller.adapter().bound, vec!["page", "app"]);

        controller.go("index.html").expect("go");
        assert!(controller.get_object("page").is_none());
        assert!(controller.get_object("app").is_some());
    }

    #[test]
    fn default_scope_lives_with_window() {
        let mut controller = embedded_controller();
        controller
            .add_object(NativeObject::new("early").expect("object"), ObjectScope::default())
            .expect("add");
        for _ in 0..2 {
            let id = controller.go("index.html").expect("go");
            complete(&mut controller, id);
        }
        assert!(controller.get_object("early").is_some());
        assert_eq!(controller.adapter().bound, vec!["early", "early"]);
    }

    /// Hand-written object that claims a name inside the alias namespace.
    struct Squatter;

    impl ScriptObject for Squatter {
        fn exposed_name(&self) -> &str {
            "__wui_napp__"
        }

        fn alias(&self) -> &str {
            "__wui___wui_napp____"
        }

        fn invoke(&self, _operation: &str, _args: &[String]) -> Result<String> {
            Ok(String::new())
        }

        fn proxy_source(&self) -> String {
            String::new()
        }

        fn operations(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn exposed_names_cannot_take_another_alias() {
        let mut controller = embedded_controller();
        controller.add_shared(Arc::new(Squatter), ObjectScope::Persistent).expect("squatter");
        assert_eq!(
            controller.add_object(NativeObject::new("napp").expect("object"), ObjectScope::Persistent),
            Err(BridgeError::DuplicateRegistration {
                name: "napp".into()
            })
        );

        let mut controller = embedded_controller();
        controller
            .add_object(NativeObject::new("napp").expect("object"), ObjectScope::Persistent)
            .expect("napp");
        assert_eq!(
            controller.add_shared(Arc::new(Squatter), ObjectScope::Persistent),
            Err(BridgeError::DuplicateRegistration {
                name: "__wui_napp__".into()
            })
        );
        assert!(matches!(
            NativeObject::new("__wui_napp__"),
            Err(BridgeError::InvalidName(_))
        ));
    }

    #[test]
    fn waker_reaches_handles_created_earlier() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut controller = embedded_controller();
        let early = controller.handle();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        controller.set_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        early.eval("1").expect("early");
        controller.handle().eval("2").expect("late");
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_reported_not_fatal() {
        let mut controller = embedded_controller();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        controller.on_error(move |err| sink.borrow_mut().push(err.clone()));

        controller.eval("throw 1");
        let id = controller.go("missing.html").expect("go");
        controller.adapter_mut().events.push_back(HostEvent::NavigationFailed {
            navigation: Some(id),
            url: "embedded://app/missing.html".into(),
            error: BridgeError::ResourceNotFound {
                path: "missing.html".into(),
            },
        });
        controller.pump();

        assert_eq!(errors.borrow().len(), 2);
        assert_eq!(controller.navigation_state(), &NavigationState::Idle);
    }

    #[test]
    fn close_unregisters_protocol() {
        let mut controller = embedded_controller();
        controller.open().expect("open");
        assert_eq!(controller.adapter().protocols, vec!["embedded"]);
        let handle = controller.handle();
        controller.close();
        assert!(controller.adapter().protocols.is_empty());
        assert_eq!(handle.eval("1"), Err(BridgeError::Disconnected));
        assert!(controller.go("index.html").is_err());
    }
}
