/// Token `_wui_convertFromNative` yields when a wire string cannot be
/// evaluated.
pub const ERROR_TOKEN: &str = "__wui_error__";

/// Helpers defined in the global scope of every loaded page.
///
/// Must not call into native objects: this runs before any are bound.
pub fn support_script() -> String {
    format!(
        r#"
var WUI_ERROR = '{ERROR_TOKEN}';
function _wui_convertToNative(val) {{
    return String(val);
}}
function _wui_convertFromNative(val) {{
    if (!val) {{
        return val;
    }}
    try {{
        return eval(val);
    }} catch (err) {{
        return WUI_ERROR;
    }}
}}
"#
    )
}
