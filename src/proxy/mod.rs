//! Native objects exposed to script, their dispatch tables and the proxy
//! source generated for them.

mod class;
mod codegen;
mod object;

use std::fmt;

use crate::error::{BridgeError, Result};
use crate::marshal::WireKind;

pub use class::{BoundObject, ClassBuilder, ClassDescriptor, NativeMethod};
pub use codegen::ProxyWriter;
pub use object::{NativeFn, NativeObject};

/// Parameter and return kinds of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<WireKind>,
    pub ret: WireKind,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Anything reachable from script as `window.<exposed_name>`.
///
/// The script side sees a single entry point,
/// `window.<alias>.invoke(operation, args) -> string`; the generated proxy
/// turns ordinary member access into calls to it.
pub trait ScriptObject: Send + Sync {
    fn exposed_name(&self) -> &str;

    fn alias(&self) -> &str;

    fn invoke(&self, operation: &str, args: &[String]) -> Result<String>;

    /// Script that installs `window.<exposed_name>` on top of the alias.
    fn proxy_source(&self) -> String;

    /// Operation names in the dispatch table.
    fn operations(&self) -> Vec<String>;

    /// Problems found while the object was being built.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

const RESERVED_PREFIX: &str = "__wui_";

/// Internal alias for an exposed name.
pub fn alias_for(exposed_name: &str) -> String {
    format!("{RESERVED_PREFIX}{exposed_name}__")
}

/// Names exposed on `window` share the window namespace with the aliases
/// and the bridge's own globals, so the `__wui_` prefix is reserved.
pub fn validate_exposed_name(name: &str) -> Result<()> {
    validate_identifier(name)?;
    if name.starts_with(RESERVED_PREFIX) {
        return Err(BridgeError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Exposed names, class names and operation names end up unquoted in
/// generated script, so they must be plain identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(BridgeError::InvalidName(name.to_string()))
    }
}
