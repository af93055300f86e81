//! Minimal HTML walking for the standings page.
//!
//! The page is machine-generated markup with lowercase tags and hashed CSS
//! module class names (`TableBody_list__P8yRn`), so elements are matched by
//! tag name plus class prefix rather than with a full DOM.

use std::ops::Range;

/// Byte range of the first `<tag>` at or after `from` carrying a class that
/// matches `class_prefix`.
pub fn find_by_class(html: &str, tag: &str, class_prefix: &str, from: usize) -> Option<Range<usize>> {
    let mut pos = from;
    while let Some(start) = find_open_tag(html, tag, pos) {
        let open_end = html[start..].find('>')? + start + 1;
        let open_tag = &html[start..open_end];
        if attr(open_tag, "class").is_some_and(|c| has_class(&c, class_prefix)) {
            return element_span(html, start, tag);
        }
        pos = open_end;
    }
    None
}

/// All non-overlapping `<tag>` elements within `html` whose class matches.
pub fn find_all_by_class(html: &str, tag: &str, class_prefix: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(span) = find_by_class(html, tag, class_prefix, pos) {
        pos = span.end;
        out.push(span);
    }
    out
}

/// Class tokens are `Name__hash`; the prefix must cover the whole `Name`.
fn has_class(class_attr: &str, prefix: &str) -> bool {
    class_attr.split_whitespace().any(|token| {
        token == prefix
            || token
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("__"))
    })
}

fn find_open_tag(html: &str, tag: &str, from: usize) -> Option<usize> {
    let needle = format!("<{tag}");
    let mut pos = from;
    loop {
        let at = html.get(pos..)?.find(&needle)? + pos;
        let after = at + needle.len();
        match html[after..].chars().next() {
            Some(c) if c.is_ascii_whitespace() || c == '>' || c == '/' => return Some(at),
            Some(_) => pos = after,
            None => return None,
        }
    }
}

/// Range of the element opened at `start`, accounting for nested elements
/// of the same tag. Self-closing tags (`<div/>`) open and close in place.
fn element_span(html: &str, start: usize, tag: &str) -> Option<Range<usize>> {
    let close = format!("</{tag}");
    let mut depth = 0usize;
    let mut pos = start;
    loop {
        let next_close = html[pos..].find(&close).map(|i| i + pos);
        match find_open_tag(html, tag, pos) {
            Some(open) if next_close.map_or(true, |c| open < c) => {
                let open_end = html[open..].find('>')? + open + 1;
                if html[..open_end - 1].ends_with('/') {
                    if depth == 0 {
                        return Some(start..open_end);
                    }
                } else {
                    depth += 1;
                }
                pos = open_end;
            }
            _ => {
                let next_close = next_close?;
                let end = html[next_close..].find('>')? + next_close + 1;
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start..end);
                }
                pos = end;
            }
        }
    }
}

/// Value of attribute `name` in an opening tag, quotes removed.
pub fn attr(open_tag: &str, name: &str) -> Option<String> {
    let mut pos = 0;
    while let Some(rel) = open_tag[pos..].find(name) {
        let at = pos + rel;
        pos = at + name.len();
        let preceded_ok = open_tag[..at]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace());
        let rest = open_tag[pos..].trim_start();
        if !preceded_ok || !rest.starts_with('=') {
            continue;
        }
        let rest = rest[1..].trim_start();
        let quote = rest.chars().next()?;
        if quote == '"' || quote == '\'' {
            let value = &rest[1..];
            let end = value.find(quote)?;
            return Some(decode_entities(&value[..end]));
        }
        let end = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        return Some(decode_entities(&rest[..end]));
    }
    None
}

/// The opening tag of an element block.
pub fn open_tag(block: &str) -> &str {
    match block.find('>') {
        Some(end) => &block[..=end],
        None => block,
    }
}

/// Markup between the opening and closing tag of an element block.
pub fn inner(block: &str) -> &str {
    let Some(open_end) = block.find('>') else {
        return "";
    };
    match block.rfind("</") {
        Some(close) if close > open_end => &block[open_end + 1..close],
        _ => "",
    }
}

/// Visible text with tags removed, entities decoded and whitespace collapsed.
pub fn text(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&out))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
