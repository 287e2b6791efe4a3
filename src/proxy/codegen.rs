use std::fmt::Write as _;

use super::Signature;
use crate::marshal::{js_string_literal, WireKind};

/// Accumulates the source of a proxy constructor, one member at a time.
///
/// The text is a running concatenation; `finish` appends the closing brace
/// and is the only way to obtain it.
#[derive(Debug)]
pub struct ProxyWriter {
    source: String,
}

impl ProxyWriter {
    /// `function cls_<name>(nobj) { ... }`, a named constructor.
    pub fn constructor(class_name: &str) -> Self {
        Self::with_header(&format!("function {}(nobj) {{", constructor_name(class_name)))
    }

    /// `function (nobj) { ... }`, for one-off objects.
    pub fn anonymous() -> Self {
        Self::with_header("function (nobj) {")
    }

    fn with_header(header: &str) -> Self {
        let mut source = String::with_capacity(256);
        source.push_str(header);
        source.push_str("\n  this.__nobj__ = nobj;");
        Self { source }
    }

    pub fn method(&mut self, name: &str, signature: &Signature) {
        let params: Vec<String> = (0..signature.params.len()).map(|i| format!("p{i}")).collect();
        let _ = write!(
            self.source,
            "\n  this.{name} = function ({}) {{\n    var rv = new Array();",
            params.join(", ")
        );
        for (kind, var) in signature.params.iter().zip(&params) {
            self.push_arg(kind, var);
        }
        let _ = write!(
            self.source,
            "\n    var vv = this.__nobj__.invoke({}, rv);\n    return {};\n  }};",
            js_string_literal(name),
            signature.ret.return_coercion("vv")
        );
    }

    pub fn property(&mut self, name: &str, kind: &WireKind, writable: bool) {
        let _ = write!(
            self.source,
            "\n  Object.defineProperty(this, {}, {{\n    enumerable: true,\n    get: function () {{\n      var rv = new Array();\n      var vv = this.__nobj__.invoke({}, rv);\n      return {};\n    }}",
            js_string_literal(name),
            js_string_literal(&format!("get_{name}")),
            kind.return_coercion("vv")
        );
        if writable {
            let _ = write!(self.source, ",\n    set: function (p0) {{\n      var rv = new Array();");
            self.push_arg(kind, "p0");
            let _ = write!(
                self.source,
                "\n      this.__nobj__.invoke({}, rv);\n    }}",
                js_string_literal(&format!("set_{name}"))
            );
        }
        self.source.push_str("\n  });");
    }

    /// A plain property holding `literal`, which must already be valid
    /// script (see `marshal::script_literal`).
    pub fn constant(&mut self, name: &str, literal: &str) {
        let _ = write!(self.source, "\n  this.{name} = {literal};");
    }

    pub fn finish(mut self) -> String {
        self.source.push_str("\n}");
        self.source
    }

    fn push_arg(&mut self, kind: &WireKind, var: &str) {
        let _ = write!(
            self.source,
            "\n    /*{}*/\n    rv.push({});",
            kind.js_type_name(),
            kind.arg_coercion(var)
        );
    }
}

pub fn constructor_name(class_name: &str) -> String {
    format!("cls_{class_name}")
}

/// Statement binding `window.<exposed>` to a proxy built by `constructor`.
pub fn install_statement(exposed_name: &str, constructor: &str, alias: &str) -> String {
    format!("window.{exposed_name} = new ({constructor})(window.{alias});")
}
