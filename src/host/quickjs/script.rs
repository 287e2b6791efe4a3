/// How a script should be scheduled relative to HTML parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptExecution {
    /// Classic blocking scripts that run in document order.
    #[default]
    Blocking,
    /// Scripts marked as `async`.
    Async,
    /// Scripts marked as `defer`, which run after the blocking ones.
    Defer,
}

impl ScriptExecution {
    /// Position in the load sequence; lower runs first.
    pub fn phase(self) -> u8 {
        match self {
            Self::Blocking => 0,
            Self::Defer => 1,
            Self::Async => 2,
        }
    }
}

/// Minimal classification of the script language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptKind {
    #[default]
    Classic,
    /// `<script type="module">`, which this host does not run.
    Module,
    /// Data blocks, templates and other non-script types.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline { code: String },
    External { src: String },
}

/// Descriptor capturing everything we need to evaluate a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub index: usize,
    pub kind: ScriptKind,
    pub execution: ScriptExecution,
    pub source: ScriptSource,
}

impl ScriptDescriptor {
    pub fn inline(index: usize, code: String, kind: ScriptKind) -> Self {
        Self {
            index,
            kind,
            execution: ScriptExecution::Blocking,
            source: ScriptSource::Inline { code },
        }
    }

    /// Name reported in stack traces and logs.
    pub fn filename(&self) -> String {
        match &self.source {
            ScriptSource::Inline { .. } => format!("inline-script-{}.js", self.index),
            ScriptSource::External { src } => src.clone(),
        }
    }
}
