//! Headless script host backed by QuickJS.
//!
//! Every navigation gets a fresh context. Pages are fetched through the
//! registered protocol handlers (or from disk for `file:` URLs), their
//! classic scripts run in load order, and the three navigation events are
//! queued for the controller to pick up.

mod processor;
mod runtime;
mod script;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use rquickjs::{Ctx, Exception, Function};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::host::{HostEvent, NavigationRequest, ScriptHostAdapter};
use crate::marshal::js_string_literal;
use crate::protocol::{RequestKind, VirtualProtocolHandler};
use crate::proxy::ScriptObject;

pub use processor::{collect_assets, collect_scripts, load_order, AssetKind, PageAsset};
pub use runtime::QuickJsEngine;
pub use script::{ScriptDescriptor, ScriptExecution, ScriptKind, ScriptSource};

type ObjectRegistry = Rc<RefCell<HashMap<String, Arc<dyn ScriptObject>>>>;

const BLANK_URL: &str = "about:blank";
const DEFAULT_READ_CHUNK: usize = 4096;

/// A document or subresource fetched for the current navigation.
struct LoadedDocument {
    url: String,
    mime_type: String,
    body: Vec<u8>,
}

impl LoadedDocument {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct QuickJsHost {
    engine: Option<QuickJsEngine>,
    protocols: HashMap<String, Arc<VirtualProtocolHandler>>,
    objects: ObjectRegistry,
    events: VecDeque<HostEvent>,
    current_url: String,
    read_chunk_size: usize,
}

impl Default for QuickJsHost {
    fn default() -> Self {
        Self::new()
    }
}

impl QuickJsHost {
    pub fn new() -> Self {
        Self {
            engine: None,
            protocols: HashMap::new(),
            objects: Rc::new(RefCell::new(HashMap::new())),
            events: VecDeque::new(),
            current_url: BLANK_URL.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }

    pub fn with_config(config: &BridgeConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size.max(1),
            ..Self::new()
        }
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    pub fn has_protocol(&self, scheme: &str) -> bool {
        self.protocols.contains_key(scheme)
    }

    fn engine(&mut self) -> Result<&QuickJsEngine> {
        if self.engine.is_none() {
            let engine = self.fresh_engine(BLANK_URL)?;
            self.engine = Some(engine);
        }
        self.engine
            .as_ref()
            .ok_or_else(|| BridgeError::Host("QuickJS engine unavailable".into()))
    }

    fn fresh_engine(&self, url: &str) -> Result<QuickJsEngine> {
        let engine = QuickJsEngine::new().map_err(|err| BridgeError::Host(format!("{err:#}")))?;
        install_invoke(&engine, Rc::clone(&self.objects))
            .and_then(|()| {
                engine.eval(
                    &format!("window.location = {{ href: {} }};", js_string_literal(url)),
                    "location.js",
                )
            })
            .map_err(|err| BridgeError::Host(format!("{err:#}")))?;
        Ok(engine)
    }

    fn fetch(&self, url: &str, kind: RequestKind) -> Result<LoadedDocument> {
        let parsed = Url::parse(url).map_err(|err| BridgeError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        if let Some(handler) = self.protocols.get(parsed.scheme()) {
            let mut stream = handler.open(url, kind)?;
            let mut body = Vec::with_capacity(stream.len());
            let mut chunk = vec![0u8; self.read_chunk_size];
            loop {
                let read = stream.read(&mut chunk);
                if read == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..read]);
            }
            return Ok(LoadedDocument {
                url: url.to_string(),
                mime_type: stream.mime_type().to_string(),
                body,
            });
        }

        match parsed.scheme() {
            "file" => {
                let path = parsed.to_file_path().map_err(|()| BridgeError::InvalidUrl {
                    url: url.to_string(),
                    reason: "not a local path".into(),
                })?;
                let body = std::fs::read(&path).map_err(|err| {
                    debug!(target: "quickjs", path = %path.display(), error = %err, "file load failed");
                    BridgeError::ResourceNotFound {
                        path: path.display().to_string(),
                    }
                })?;
                let name = path.to_string_lossy();
                Ok(LoadedDocument {
                    url: url.to_string(),
                    mime_type: crate::resources::mime_type_for_path(&name).to_string(),
                    body,
                })
            }
            other => Err(BridgeError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Request the page's stylesheets and images. Their bodies are read in
    /// full and dropped; misses are reported without stopping the load.
    fn load_page_assets(&mut self, document: &LoadedDocument, html: &str) {
        let assets = match collect_assets(html) {
            Ok(assets) => assets,
            Err(err) => {
                warn!(target: "quickjs", url = %document.url, error = %err, "failed to scan page assets");
                return;
            }
        };
        for asset in assets {
            match self.fetch_secondary(&document.url, &asset.href) {
                Ok(loaded) => {
                    debug!(
                        target: "quickjs",
                        url = %loaded.url,
                        kind = ?asset.kind,
                        bytes = loaded.body.len(),
                        "page asset loaded"
                    );
                }
                Err((url, error)) => {
                    warn!(target: "quickjs", %url, kind = ?asset.kind, error = %error, "page asset failed");
                    self.events.push_back(HostEvent::ResourceFailed { url, error });
                }
            }
        }
    }

    fn run_page_scripts(&mut self, document: &LoadedDocument, html: &str) {
        let scripts = match collect_scripts(html) {
            Ok(scripts) => load_order(scripts),
            Err(err) => {
                warn!(target: "quickjs", url = %document.url, error = %err, "failed to scan page scripts");
                return;
            }
        };

        let mut executed = 0usize;
        for descriptor in scripts {
            let filename = descriptor.filename();
            let code = match &descriptor.source {
                ScriptSource::Inline { code } => code.clone(),
                ScriptSource::External { src } => match self.fetch_secondary(&document.url, src) {
                    Ok(loaded) => loaded.text(),
                    Err((url, error)) => {
                        self.events.push_back(HostEvent::ResourceFailed { url, error });
                        continue;
                    }
                },
            };
            let Some(engine) = self.engine.as_ref() else {
                return;
            };
            match engine.eval(&code, &filename) {
                Ok(()) => executed += 1,
                Err(err) => {
                    warn!(target: "quickjs", %filename, error = %err, "page script failed");
                    self.events.push_back(HostEvent::ScriptFailed {
                        source: filename,
                        error: BridgeError::ScriptEvaluation(format!("{err:#}")),
                    });
                }
            }
        }
        debug!(target: "quickjs", url = %document.url, executed, "page scripts finished");
    }

    fn fetch_secondary(
        &self,
        page_url: &str,
        src: &str,
    ) -> std::result::Result<LoadedDocument, (String, BridgeError)> {
        let resolved = Url::parse(page_url)
            .and_then(|base| base.join(src))
            .map(|url| url.to_string())
            .map_err(|err| {
                (
                    src.to_string(),
                    BridgeError::InvalidUrl {
                        url: src.to_string(),
                        reason: err.to_string(),
                    },
                )
            })?;
        self.fetch(&resolved, RequestKind::Secondary)
            .map_err(|error| (resolved, error))
    }
}

impl ScriptHostAdapter for QuickJsHost {
    fn navigate(&mut self, request: NavigationRequest) -> Result<()> {
        let NavigationRequest { id, url } = request;
        info!(target: "quickjs", %id, %url, "navigating");
        self.events.push_back(HostEvent::BeforeNavigate {
            navigation: Some(id),
            url: url.clone(),
        });

        let document = match self.fetch(&url, RequestKind::Primary) {
            Ok(document) => document,
            Err(error) => {
                self.events.push_back(HostEvent::NavigationFailed {
                    navigation: Some(id),
                    url,
                    error,
                });
                return Ok(());
            }
        };

        // Bindings belong to the page being replaced.
        self.objects.borrow_mut().clear();
        self.engine = None;
        let engine = self.fresh_engine(&document.url)?;
        self.engine = Some(engine);
        self.current_url = document.url.clone();

        self.events.push_back(HostEvent::NavigateComplete {
            navigation: Some(id),
            url: document.url.clone(),
        });
        if document.mime_type.starts_with("text/html") {
            let html = document.text();
            self.load_page_assets(&document, &html);
            self.run_page_scripts(&document, &html);
        }
        self.events.push_back(HostEvent::DocumentComplete {
            navigation: Some(id),
            url: document.url,
        });
        Ok(())
    }

    fn eval(&mut self, script: &str) -> Result<String> {
        self.engine()?
            .eval_to_string(script, "eval.js")
            .map_err(|err| BridgeError::ScriptEvaluation(format!("{err:#}")))
    }

    fn bind_object(&mut self, object: Arc<dyn ScriptObject>) -> Result<()> {
        let alias = object.alias().to_string();
        let install = format!(
            "window.{alias} = {{ invoke: function (op, args) {{ return __wui_invoke({}, op, args); }} }};",
            js_string_literal(&alias)
        );
        self.objects.borrow_mut().insert(alias.clone(), object);
        self.engine()?
            .eval(&install, "bind.js")
            .map_err(|err| BridgeError::ScriptEvaluation(format!("{err:#}")))?;
        debug!(target: "quickjs", %alias, "native object bound");
        Ok(())
    }

    fn register_protocol(&mut self, handler: Arc<VirtualProtocolHandler>) -> Result<()> {
        let scheme = handler.scheme().to_string();
        debug!(target: "quickjs", %scheme, "protocol registered");
        self.protocols.insert(scheme, handler);
        Ok(())
    }

    fn unregister_protocol(&mut self, scheme: &str) {
        if self.protocols.remove(scheme).is_some() {
            debug!(target: "quickjs", %scheme, "protocol unregistered");
        }
    }

    fn poll_event(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }
}

fn install_invoke(engine: &QuickJsEngine, registry: ObjectRegistry) -> anyhow::Result<()> {
    engine.with_context(|ctx| {
        let func = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>,
                  alias: String,
                  operation: String,
                  args: Vec<String>|
                  -> rquickjs::Result<String> {
                let object = registry.borrow().get(&alias).cloned();
                let result = match object {
                    Some(object) => object.invoke(&operation, &args),
                    None => Err(BridgeError::UnknownObject(alias.clone())),
                };
                result.map_err(|err| invoke_error(&ctx, &alias, &operation, err))
            },
        )?
        .with_name("__wui_invoke")?;
        ctx.globals().set("__wui_invoke", func)?;
        Ok(())
    })
}

fn invoke_error(ctx: &Ctx<'_>, alias: &str, operation: &str, err: BridgeError) -> rquickjs::Error {
    warn!(target: "quickjs", %alias, %operation, error = %err, "native invoke failed");
    Exception::throw_message(ctx, &err.to_string())
}
