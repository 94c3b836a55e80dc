//! Cosmetic CSS normalization.
//!
//! The passes run in a fixed order: comments, whitespace runs, the `;` before `}`, whitespace
//! after `{`, whitespace after `;`, then an outer trim. Two stylesheets that differ only in
//! comments or formatting normalize to the same text, which keeps cache keys stable.

/// Normalize caller CSS. `"/* c */ a{color:red;}  "` becomes `"a{color:red}"`.
pub fn normalize_css(css: &str) -> String {
    let without_comments = strip_comments(css);
    let collapsed = collapse_whitespace(&without_comments);
    let closed = drop_semicolon_before_brace(&collapsed);
    let opened = drop_space_after(&closed, '{');
    let separated = drop_space_after(&opened, ';');
    separated.trim().to_string()
}

/// Remove `/* ... */` blocks. An unterminated comment is left untouched.
fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        match rest[start + 2..].find("*/") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2 + end + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

fn collapse_whitespace(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut in_space = false;
    for ch in css.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

// Input is already collapsed, so "whitespace" here is at most one space.
fn drop_semicolon_before_brace(css: &str) -> String {
    let chars: Vec<char> = css.chars().collect();
    let mut out = String::with_capacity(css.len());
    let mut index = 0;
    while index < chars.len() {
        let ch = chars[index];
        if ch == ';' {
            let mut next = index + 1;
            if chars.get(next) == Some(&' ') {
                next += 1;
            }
            if chars.get(next) == Some(&'}') {
                out.push('}');
                index = next + 1;
                continue;
            }
        }
        out.push(ch);
        index += 1;
    }
    out
}

fn drop_space_after(css: &str, marker: char) -> String {
    let mut out = String::with_capacity(css.len());
    let mut after_marker = false;
    for ch in css.chars() {
        if after_marker && ch == ' ' {
            after_marker = false;
            continue;
        }
        after_marker = ch == marker;
        out.push(ch);
    }
    out
}
