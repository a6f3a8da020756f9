/// Maps a record key to a filesystem-safe file stem.
///
/// Unsafe characters are percent-encoded per UTF-8 byte and `%` itself is
/// always encoded, so the mapping is deterministic and never maps two distinct
/// keys to the same stem (`a/b` and `a\b` stay apart). Keys made only of safe
/// characters pass through unchanged.
pub fn sanitize_key(key: &str) -> String {
    match key {
        "" => return "%".to_string(),
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }

    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        if needs_escape(ch) {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn needs_escape(ch: char) -> bool {
    matches!(
        ch,
        '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%'
    ) || ch.is_control()
}
