//! Conversion between native values and the string form that crosses the
//! bridge, plus the script-side coercions generated proxies use.

mod support;

use std::fmt;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{BridgeError, Result};

pub use support::{support_script, ERROR_TOKEN};

/// Separator between sequence elements on the wire.
pub const SEQUENCE_SEPARATOR: char = '\u{1}';
const SEPARATOR_LITERAL: &str = "'\\u0001'";

/// Script-side shape of a wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireKind {
    Unit,
    Integer,
    Boolean,
    String,
    Json,
    Sequence(Box<WireKind>),
}

impl WireKind {
    pub fn js_type_name(&self) -> &'static str {
        match self {
            Self::Unit => "undefined",
            Self::Integer => "number",
            Self::Boolean => "bool",
            Self::String => "string",
            Self::Json => "object",
            Self::Sequence(_) => "array",
        }
    }

    /// Expression turning script value `var` into its wire string.
    pub fn arg_coercion(&self, var: &str) -> String {
        match self {
            Self::Unit => "''".to_string(),
            Self::Integer | Self::String => format!("String({var})"),
            Self::Boolean => format!("({var} ? 'true' : 'false')"),
            Self::Json => format!("String(JSON.stringify({var}))"),
            Self::Sequence(elem) => {
                let item = format!("{var}[i]");
                format!(
                    "(function () {{ var lst = ''; var sep = ''; for (var i = 0; i < {var}.length; i++) {{ lst += sep + {}; sep = {SEPARATOR_LITERAL}; }} return lst; }})()",
                    elem.arg_coercion(&item)
                )
            }
        }
    }

    /// Expression turning wire string `var` back into a script value.
    pub fn return_coercion(&self, var: &str) -> String {
        match self {
            Self::Unit => "undefined".to_string(),
            Self::Integer | Self::Boolean => format!("_wui_convertFromNative({var})"),
            Self::String => var.to_string(),
            Self::Json => format!("JSON.parse({var})"),
            Self::Sequence(elem) => format!(
                "({var} === '' ? [] : {var}.split({SEPARATOR_LITERAL}).map(function (e) {{ return {}; }}))",
                elem.return_coercion("e")
            ),
        }
    }
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(elem) => write!(f, "array<{elem}>"),
            other => f.write_str(other.js_type_name()),
        }
    }
}

/// A value that can cross the bridge as a string.
pub trait WireType: Sized {
    fn kind() -> WireKind;
    fn encode(&self) -> String;
    fn decode(raw: &str) -> Result<Self, String>;
}

/// Wire types allowed as sequence elements.
pub trait ScalarWire: WireType {}

macro_rules! impl_integer_wire {
    ($($ty:ty),*) => {
        $(
            impl WireType for $ty {
                fn kind() -> WireKind {
                    WireKind::Integer
                }

                fn encode(&self) -> String {
                    self.to_string()
                }

                fn decode(raw: &str) -> Result<Self, String> {
                    raw.trim()
                        .parse::<$ty>()
                        .map_err(|err| format!("expected {}, got {raw:?}: {err}", stringify!($ty)))
                }
            }

            impl ScalarWire for $ty {}
        )*
    };
}

impl_integer_wire!(i32, i64, u32, u64);

impl WireType for bool {
    fn kind() -> WireKind {
        WireKind::Boolean
    }

    fn encode(&self) -> String {
        let token = if *self { "true" } else { "false" };
        token.to_string()
    }

    fn decode(raw: &str) -> Result<Self, String> {
        match raw {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("expected true or false, got {other:?}")),
        }
    }
}

impl ScalarWire for bool {}

impl WireType for String {
    fn kind() -> WireKind {
        WireKind::String
    }

    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl ScalarWire for String {}

impl WireType for JsonValue {
    fn kind() -> WireKind {
        WireKind::Json
    }

    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|err| format!("invalid JSON: {err}"))
    }
}

impl ScalarWire for JsonValue {}

impl WireType for () {
    fn kind() -> WireKind {
        WireKind::Unit
    }

    fn encode(&self) -> String {
        String::new()
    }

    fn decode(_raw: &str) -> Result<Self, String> {
        Ok(())
    }
}

impl<T: ScalarWire> WireType for Vec<T> {
    fn kind() -> WireKind {
        WireKind::Sequence(Box::new(T::kind()))
    }

    fn encode(&self) -> String {
        let mut out = String::new();
        for (index, item) in self.iter().enumerate() {
            let encoded = item.encode();
            if encoded.contains(SEQUENCE_SEPARATOR) {
                warn!(
                    target: "bridge",
                    index,
                    "sequence element contains the separator byte and will not round-trip"
                );
            }
            if index > 0 {
                out.push(SEQUENCE_SEPARATOR);
            }
            out.push_str(&encoded);
        }
        out
    }

    fn decode(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        raw.split(SEQUENCE_SEPARATOR)
            .enumerate()
            .map(|(index, item)| T::decode(item).map_err(|err| format!("element {index}: {err}")))
            .collect()
    }
}

/// Return values of native functions.
///
/// Implemented for every wire type and for `Result<T, E>`, whose error is
/// surfaced as `BridgeError::Native`.
pub trait IntoWire {
    fn kind() -> WireKind;
    fn into_wire(self) -> Result<String>;
}

macro_rules! impl_into_wire {
    ($($ty:ty),*) => {
        $(
            impl IntoWire for $ty {
                fn kind() -> WireKind {
                    <$ty as WireType>::kind()
                }

                fn into_wire(self) -> Result<String> {
                    Ok(self.encode())
                }
            }
        )*
    };
}

impl_into_wire!(i32, i64, u32, u64, bool, String, JsonValue, ());

impl<T: ScalarWire> IntoWire for Vec<T> {
    fn kind() -> WireKind {
        <Vec<T> as WireType>::kind()
    }

    fn into_wire(self) -> Result<String> {
        Ok(self.encode())
    }
}

impl<T: WireType, E: fmt::Display> IntoWire for std::result::Result<T, E> {
    fn kind() -> WireKind {
        T::kind()
    }

    fn into_wire(self) -> Result<String> {
        self.map(|value| value.encode())
            .map_err(|err| BridgeError::Native(err.to_string()))
    }
}

/// Positional decoder over the argument list of one invocation.
#[derive(Debug)]
pub struct ArgReader<'a> {
    operation: &'a str,
    args: &'a [String],
    index: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(operation: &'a str, args: &'a [String]) -> Self {
        Self {
            operation,
            args,
            index: 0,
        }
    }

    /// Decode the next positional argument as `T`.
    pub fn next<T: WireType>(&mut self) -> Result<T> {
        let index = self.index;
        let raw = self
            .args
            .get(index)
            .ok_or_else(|| BridgeError::ArgumentDecode {
                operation: self.operation.to_string(),
                index,
                reason: format!("missing argument (got {})", self.args.len()),
            })?;
        self.index += 1;
        T::decode(raw).map_err(|reason| BridgeError::ArgumentDecode {
            operation: self.operation.to_string(),
            index,
            reason,
        })
    }

    pub fn position(&self) -> usize {
        self.index
    }
}

/// Quote `value` as a script string literal.
pub fn js_string_literal(value: &str) -> String {
    // JSON string escaping is a valid script literal, except for the two
    // line terminators JSON leaves raw.
    let quoted = serde_json::to_string(value).unwrap_or_else(|_| String::from("\"\""));
    quoted.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029")
}

/// Script literal for a native value, as seen by script after decoding.
pub fn script_literal<T: WireType>(value: &T) -> String {
    T::kind().return_coercion(&js_string_literal(&value.encode()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: WireType + PartialEq + fmt::Debug>(value: T) {
        let encoded = value.encode();
        assert_eq!(T::decode(&encoded).unwrap(), value, "wire form {encoded:?}");
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(0i32);
        round_trip(-17i32);
        round_trip(i64::MAX);
        round_trip(true);
        round_trip(false);
        round_trip(String::from("hello \"world\"\n"));
        round_trip(String::new());
        round_trip(serde_json::json!({"a": [1, 2], "b": "\u{1}"}));
    }

    #[test]
    fn sequences_round_trip() {
        round_trip(vec![1i32, 2, 3]);
        round_trip(Vec::<i32>::new());
        round_trip(vec![String::from("a"), String::from(""), String::from("c")]);
        round_trip(vec![true, false]);
    }

    #[test]
    fn booleans_use_literal_tokens() {
        assert_eq!(true.encode(), "true");
        assert_eq!(false.encode(), "false");
        assert!(bool::decode("1").is_err());
    }

    #[test]
    fn sequence_uses_separator() {
        assert_eq!(vec![1u32, 2].encode(), "1\u{1}2");
    }

    #[test]
    fn missing_argument_is_an_error() {
        let args = vec![String::from("4")];
        let mut reader = ArgReader::new("add", &args);
        assert_eq!(reader.next::<i32>().unwrap(), 4);
        let err = reader.next::<i32>().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ArgumentDecode { index: 1, .. }
        ));
    }

    #[test]
    fn malformed_argument_is_an_error() {
        let args = vec![String::from("4.5")];
        let mut reader = ArgReader::new("add", &args);
        let err = reader.next::<i32>().unwrap_err();
        match err {
            BridgeError::ArgumentDecode {
                operation, index, ..
            } => {
                assert_eq!(operation, "add");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn result_errors_become_native_errors() {
        let failed: std::result::Result<i32, String> = Err("boom".into());
        assert_eq!(
            failed.into_wire().unwrap_err(),
            BridgeError::Native("boom".into())
        );
        assert_eq!(<std::result::Result<bool, String> as IntoWire>::kind(), WireKind::Boolean);
    }

    #[test]
    fn literals_are_quote_escaped() {
        assert_eq!(js_string_literal("it's \"x\""), "\"it's \\\"x\\\"\"");
        assert_eq!(script_literal(&String::from("a\"b")), "\"a\\\"b\"");
        assert_eq!(script_literal(&7i32), "_wui_convertFromNative(\"7\")");
    }

    #[test]
    fn generated_coercions_match_decoders() {
        assert_eq!(WireKind::Boolean.arg_coercion("p0"), "(p0 ? 'true' : 'false')");
        let seq = <Vec<i32> as WireType>::kind();
        assert!(seq.arg_coercion("p0").contains("String(p0[i])"));
        assert!(seq.return_coercion("vv").contains(".split('\\u0001')"));
        assert_eq!(seq.to_string(), "array<number>");
    }
}
