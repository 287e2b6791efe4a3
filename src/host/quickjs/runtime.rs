use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError, Function, Runtime, Value};

/// JavaScript runtime backed by QuickJS.
///
/// The engine owns the QuickJS runtime and one context, which plays the
/// role of a single page. It installs `window` as an alias of the global
/// object and a `console` that forwards to Rust tracing.
pub struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
}

impl QuickJsEngine {
    pub fn new() -> Result<Self> {
        let runtime = Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        let engine = Self { runtime, context };
        engine.init_globals()?;
        Ok(engine)
    }

    /// Evaluate a script and discard the result.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluate a script and return its completion value passed through the
    /// script's own `String` conversion.
    pub fn eval_to_string(&self, source: &str, filename: &str) -> Result<String> {
        let script = Self::with_source_url(source, filename);
        let result = self.context.with(|ctx| -> rquickjs::Result<String> {
            let value: Value = ctx.eval(script)?;
            let to_string: Function = ctx.globals().get("String")?;
            to_string.call((value,))
        });
        let value = self.check(result)?;
        self.execute_pending_jobs();
        Ok(value)
    }

    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let result = self.context.with(|ctx| ctx.eval::<V, _>(script));
        let value = self.check(result)?;
        self.execute_pending_jobs();
        Ok(value)
    }

    /// Provide access to the underlying QuickJS context.
    pub fn with_context<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        let result = self.context.with(f);
        self.check(result)
    }

    fn check<T>(&self, result: rquickjs::Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => {
                let message = self
                    .context
                    .with(|ctx| capture_exception_message(&ctx))
                    .unwrap_or_else(|| "QuickJS exception".to_string());
                Err(anyhow::anyhow!(message))
            }
            Err(err) => Err(anyhow::Error::from(err)),
        }
    }

    /// Run promise continuations queued by the last evaluation.
    fn execute_pending_jobs(&self) {
        const MAX_JOBS: usize = 1000;
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= MAX_JOBS {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            MAX_JOBS
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(target: "quickjs", "Job execution error: {:?}", job_exception);
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
    }

    fn init_globals(&self) -> Result<()> {
        self.with_context(|ctx| {
            let global = ctx.globals();
            let log_fn = Function::new(ctx.clone(), log_from_js)?.with_name("__wui_log")?;
            global.set("__wui_log", log_fn)?;
            ctx.eval::<(), _>(GLOBALS_BOOTSTRAP.as_bytes())
        })
    }

    fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script.into_bytes()
    }
}

fn log_from_js(level: String, message: String) -> rquickjs::Result<()> {
    match level.as_str() {
        "error" => tracing::error!(target: "quickjs", "{message}"),
        "warn" => tracing::warn!(target: "quickjs", "{message}"),
        "debug" => tracing::debug!(target: "quickjs", "{message}"),
        _ => tracing::info!(target: "quickjs", "{message}"),
    }
    Ok(())
}

fn capture_exception_message(ctx: &Ctx<'_>) -> Option<String> {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        if let Ok(message) = obj.get::<_, String>("message") {
            if let Ok(stack) = obj.get::<_, String>("stack") {
                if !stack.is_empty() {
                    return Some(format!("Error: {}\nStack: {}", message, stack));
                }
            }
            return Some(format!("Error: {}", message));
        }
    }
    if let Some(text) = exception.as_string() {
        return text.to_string().ok();
    }

    Some(format!("{:?}", exception))
}

const GLOBALS_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    if (typeof global.window === 'undefined') {
        global.window = global;
    }
    if (typeof global.self === 'undefined') {
        global.self = global;
    }

    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logAt = (level) => (...args) => {
        try {
            global.__wui_log(level, args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    global.console = {
        log: logAt('info'),
        info: logAt('info'),
        debug: logAt('debug'),
        warn: logAt('warn'),
        error: logAt('error'),
    };
})();
"#;
