//! JSON scalar output honoring `JsonFlags`.
//!
//! By default `/` is escaped and non-ASCII text is written as `\uXXXX`
//! (surrogate pairs above the BMP); floats drop a `.0` fraction unless
//! `PRESERVE_ZERO_FRACTION` is set.
use std::io::{self, Write};

use crate::config::JsonFlags;

pub fn escape_str(s: &str, flags: JsonFlags) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '/' if !flags.contains(JsonFlags::UNESCAPED_SLASHES) => out.push_str("\\/"),
            c if (c as u32) < 0x20 => push_unit(&mut out, c as u16),
            // line terminators stay escaped even when unicode is not
            '\u{2028}' | '\u{2029}' => push_unit(&mut out, c as u16),
            c if !c.is_ascii() && !flags.contains(JsonFlags::UNESCAPED_UNICODE) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    push_unit(&mut out, *unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn push_unit(out: &mut String, unit: u16) {
    out.push_str(&format!("\\u{unit:04x}"));
}

pub fn write_str<W: Write + ?Sized>(out: &mut W, s: &str, flags: JsonFlags) -> io::Result<()> {
    out.write_all(escape_str(s, flags).as_bytes())
}

/// `None` for NaN and infinities, which JSON cannot carry.
pub fn format_float(f: f64, flags: JsonFlags) -> Option<String> {
    let number = serde_json::Number::from_f64(f)?;
    let text = number.to_string();
    if !flags.contains(JsonFlags::PRESERVE_ZERO_FRACTION) {
        if let Some(whole) = text.strip_suffix(".0") {
            return Some(whole.to_string());
        }
    }
    Some(text)
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_escaping() {
        assert_eq!(escape_str("a/b", JsonFlags::NONE), r#""a\/b""#);
        assert_eq!(escape_str("\u{e9}", JsonFlags::NONE), r#""\u00e9""#);
        assert_eq!(escape_str("\u{1f600}", JsonFlags::NONE), r#""\ud83d\ude00""#);
        assert_eq!(escape_str("q\"\\\n\u{1}", JsonFlags::NONE), r#""q\"\\\n\u0001""#);
    }

    #[test]
    fn flags_relax_escaping() {
        let flags = JsonFlags::UNESCAPED_SLASHES | JsonFlags::UNESCAPED_UNICODE;
        assert_eq!(escape_str("a/\u{e9}", flags), "\"a/\u{e9}\"");
        assert_eq!(escape_str("\u{2028}", flags), r#""\u2028""#);
    }

    #[test]
    fn floats() {
        assert_eq!(format_float(1.0, JsonFlags::NONE).as_deref(), Some("1"));
        assert_eq!(format_float(1.0, JsonFlags::PRESERVE_ZERO_FRACTION).as_deref(), Some("1.0"));
        assert_eq!(format_float(2.5, JsonFlags::NONE).as_deref(), Some("2.5"));
        assert_eq!(format_float(f64::NAN, JsonFlags::NONE), None);
        assert_eq!(format_float(f64::INFINITY, JsonFlags::NONE), None);
    }
}
