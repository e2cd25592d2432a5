#![forbid(unsafe_code)]

//! Entity escaping for canonical output.
//!
//! - Text nodes: `&`, `<`, `>` and `\r`
//! - Attribute values: `&`, `<`, `"`, `\t`, `\n`, `\r`
//! - PI data: `\r`

/// Append `s` to `out` escaped as canonical text content.
pub fn text_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

/// Append `s` to `out` escaped as a canonical attribute value.
pub fn attr_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    text_into(&mut out, s);
    out
}

pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    attr_into(&mut out, s);
    out
}

pub fn escape_pi(s: &str) -> String {
    s.replace('\r', "&#xD;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("plain"), "plain");
        assert_eq!(escape_text("x&y<z>w"), "x&amp;y&lt;z&gt;w");
        assert_eq!(escape_text("cr\rhere"), "cr&#xD;here");
        // quotes stay literal in text
        assert_eq!(escape_text("\"q\""), "\"q\"");
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr("a>b"), "a>b");
        assert_eq!(escape_attr("x&y\"z"), "x&amp;y&quot;z");
        assert_eq!(escape_attr("1\t2\n3\r4"), "1&#x9;2&#xA;3&#xD;4");
    }
}
