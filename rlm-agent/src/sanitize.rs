//! Code sanitizer for controller output

const FENCE: &str = "```";

/// Extract the program text from a controller reply.
///
/// With a code fence the first fenced block is taken (the closing fence
/// may be missing) and a bare language tag on the opening line is dropped.
/// The result is trimmed; syntax is not checked here.
pub fn sanitize(raw: &str) -> String {
    let Some(open) = raw.find(FENCE) else {
        return raw.trim().to_string();
    };

    let mut body = &raw[open + FENCE.len()..];
    let (first_line, rest) = match body.find('\n') {
        Some(nl) => (&body[..nl], Some(&body[nl + 1..])),
        None => (body, None),
    };
    let tag = first_line.trim();
    match rest {
        Some(rest) if tag.is_empty() || is_language_tag(tag) => body = rest,
        None if is_known_language(tag.trim_end_matches(FENCE)) => body = "",
        _ => {}
    }

    let inner = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    inner.trim().to_string()
}

/// Remove `<think>...</think>` blocks emitted by reasoning models.
///
/// An unterminated block runs to the end of the text. A closing tag with
/// no opening tag drops everything before it.
pub fn strip_reasoning(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut text = text;
    if let Some(close) = text.find(CLOSE) {
        if !text[..close].contains(OPEN) {
            text = &text[close + CLOSE.len()..];
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn is_language_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.'))
}

fn is_known_language(tag: &str) -> bool {
    matches!(
        tag.trim().to_ascii_lowercase().as_str(),
        "python" | "python3" | "py" | "text" | "plaintext" | "code"
    )
}
