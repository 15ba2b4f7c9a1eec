//! Single-key value extraction from a flat JSON object.
//!
//! The update service only ever answers with one flat object of string
//! fields, so this is deliberately not a JSON parser: no nesting, arrays,
//! escape decoding or numeric typing.

/// Return the raw value stored under `key`, if present.
///
/// Locates the literal `"<key>":`. A quoted value runs to the next
/// unescaped quote; a bare value runs to the next `,` or `}`. Escape
/// sequences are returned undecoded.
pub fn extract(json: &str, key: &str) -> Option<String> {
    let needle = format!("\"{}\":", key);
    let start = json.find(&needle)? + needle.len();
    let rest = json[start..].trim_start();

    if let Some(quoted) = rest.strip_prefix('"') {
        let bytes = quoted.as_bytes();
        let mut end = 0;
        while end < bytes.len() {
            match bytes[end] {
                b'\\' => end += 2,
                b'"' => break,
                _ => end += 1,
            }
        }
        let end = end.min(bytes.len());
        Some(quoted[..end].to_string())
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim_end().to_string())
    }
}
