use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wui::resources::PackedResource;
use wui::{
    BridgeConfig, BridgeController, ClassBuilder, ContentSource, ExecutionModel, NativeObject,
    ObjectScope, QuickJsHost, ResourceTable,
};

/// Output of the asset packer for the demo pages.
static ASSETS: &[PackedResource] = &[
    ("index.html", include_bytes!("../assets/index.html"), "text/html", true),
    ("app.js", include_bytes!("../assets/app.js"), "application/javascript", true),
    ("style.css", include_bytes!("../assets/style.css"), "text/css", true),
];

#[derive(Debug, Default)]
struct Counter {
    value: i32,
}

fn main() -> Result<()> {
    let page = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from("index.html"));

    let config = BridgeConfig::from_env().unwrap_or_else(|err| {
        eprintln!("Failed to load bridge configuration: {err}. Using defaults.");
        BridgeConfig::default()
    });

    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .try_init()
    {
        eprintln!("tracing subscriber not installed: {err}");
    }

    if let Ok(dir) = BridgeConfig::data_dir("wui") {
        info!(target: "bridge", data_dir = %dir.display(), "using data directory");
    }

    let table = Arc::new(ResourceTable::from_static(ASSETS).context("invalid asset table")?);
    let execution = config.execution;
    let host = QuickJsHost::with_config(&config);
    let mut controller = BridgeController::new(host, config)?;
    controller.set_content_source(ContentSource::Embedded(table))?;
    controller.on_error(|err| eprintln!("bridge error: {err}"));

    let counter = Arc::new(Mutex::new(Counter::default()));
    let counter_class = Arc::new(
        ClassBuilder::<Counter>::new("Counter")?
            .property("value", |c| c.value, |c, v| c.value = v)
            .method("increment", |c: &mut Counter, by: i32| {
                c.value += by;
                c.value
            })
            .end()?,
    );
    controller.set_object(&counter_class, "counter", Arc::clone(&counter), ObjectScope::Persistent)?;

    controller.on_load(|controller, path| {
        info!(target: "bridge", %path, "demo page loaded");
        let console = NativeObject::new("console")
            .map(|object| {
                object.function("log", |text: String| {
                    info!(target: "quickjs", "{text}");
                })
            });
        let napp = NativeObject::new("napp").map(|object| {
            object.function("send", |message: String| {
                println!("napp.send: {message}");
            })
        });
        for object in [console, napp] {
            let added = object.and_then(|object| controller.add_object(object, ObjectScope::Page));
            if let Err(err) = added {
                eprintln!("failed to expose object: {err}");
            }
        }
    });

    controller.go(&page)?;

    match execution {
        ExecutionModel::CoLocated => {
            controller.pump();
            let value = controller.try_eval("onNativeReady()")?;
            println!("counter.value = {value}");
            let described = controller.try_eval("describe(['a', 'b', 'c'])")?;
            println!("{described}");
        }
        ExecutionModel::Split => {
            let handle = controller.handle();
            let native = thread::spawn(move || -> Result<String> {
                let reply = handle.eval_with_reply("onNativeReady()")?;
                let value = reply
                    .blocking_recv()
                    .map_err(|_| anyhow!("host dropped the reply"))??;
                handle.close()?;
                Ok(value)
            });
            controller.run();
            let value = native
                .join()
                .map_err(|_| anyhow!("native thread panicked"))??;
            println!("counter.value = {value}");
        }
    }

    let value = counter.lock().map(|counter| counter.value).unwrap_or_default();
    info!(target: "bridge", value, "native counter after script calls");
    Ok(())
}
