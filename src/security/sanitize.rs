use serde_json::Value;

/// Recursively strips script tags, javascript: URIs, and inline event
/// handler attributes from every string field in a request body.
pub fn sanitize_json(value: &mut Value) {
    match value {
        Value::String(s) => {
            *s = sanitize_str(s);
        }
        Value::Array(items) => {
            for item in items {
                sanitize_json(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_json(v);
            }
        }
        _ => {}
    }
}

pub fn sanitize_str(input: &str) -> String {
    let mut out = strip_script_blocks(input);
    out = strip_case_insensitive(&out, "javascript:");
    out = strip_event_handlers(&out);
    out
}

/// Removes `<script ...>...</script>` blocks and any unterminated `<script`
/// tail. ASCII-lowercasing keeps byte offsets aligned with the original.
fn strip_script_blocks(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find("<script") {
        let abs_start = pos + start;
        out.push_str(&input[pos..abs_start]);
        match lower[abs_start..].find("</script>") {
            Some(end) => {
                pos = abs_start + end + "</script>".len();
            }
            None => {
                // Unterminated script block: drop the rest
                return out;
            }
        }
    }
    out.push_str(&input[pos..]);
    out
}

fn strip_case_insensitive(input: &str, needle: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(needle) {
        let abs_start = pos + start;
        out.push_str(&input[pos..abs_start]);
        pos = abs_start + needle.len();
    }
    out.push_str(&input[pos..]);
    out
}

/// Removes `onXxx=` attribute prefixes (onclick=, onerror=, ...). Only the
/// handler attribute name and equals sign are stripped; surrounding text is
/// preserved. Matches only start at ASCII `o`, so slicing stays on char
/// boundaries.
fn strip_event_handlers(input: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut copy_from = 0;

    while i < bytes.len() {
        if bytes[i..].starts_with(b"on") {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                j += 1;
            }
            if j > i + 2 && j < bytes.len() && bytes[j] == b'=' {
                out.push_str(&input[copy_from..i]);
                i = j + 1;
                copy_from = i;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&input[copy_from..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_tags_stripped() {
        assert_eq!(
            sanitize_str("hello <script>alert(1)</script>world"),
            "hello world"
        );
        assert_eq!(sanitize_str("safe <SCRIPT src=x>boom"), "safe ");
    }

    #[test]
    fn test_javascript_uri_stripped() {
        assert_eq!(sanitize_str("click JavaScript:alert(1)"), "click alert(1)");
    }

    #[test]
    fn test_event_handlers_stripped() {
        assert_eq!(sanitize_str("img onerror=alert(1)"), "img alert(1)");
        // "on" inside a normal word is left alone
        assert_eq!(sanitize_str("show me the monday report"), "show me the monday report");
    }

    #[test]
    fn test_non_ascii_preserved() {
        assert_eq!(sanitize_str("montrez les commandes dès août"), "montrez les commandes dès août");
    }

    #[test]
    fn test_recursive_sanitization() {
        let mut body = json!({
            "message": "<script>x</script>show orders",
            "nested": {"note": "javascript:void(0)"},
            "list": ["a", "onclick=evil"],
            "count": 3
        });
        sanitize_json(&mut body);
        assert_eq!(body["message"], "show orders");
        assert_eq!(body["nested"]["note"], "void(0)");
        assert_eq!(body["list"][1], "evil");
        assert_eq!(body["count"], 3);
    }
}
