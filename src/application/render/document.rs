use crate::domain::PageFormat;

use super::css::normalize_css;

/// Always appended after caller CSS so it wins specificity ties.
const PRINT_SAFETY_CSS: &str = r#"* {
  -webkit-print-color-adjust: exact !important;
  print-color-adjust: exact !important;
  color-adjust: exact !important;
}
.grid {
  display: block !important;
  grid-template-columns: unset !important;
  gap: unset !important;
}
@media print {
  * {
    -webkit-print-color-adjust: exact !important;
    print-color-adjust: exact !important;
    box-shadow: none !important;
  }
}
.print\:hidden { display: none !important; }
img, svg { max-width: 100% !important; height: auto !important; }
table { font-size: 11px; }
body {
  margin: 0;
  padding: 15px;
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
  font-size: 12px;
  line-height: 1.4;
}"#;

const PAGE_MARGIN: &str = "0.3in";

#[derive(Debug, Clone, Copy)]
pub struct DocumentOptions<'a> {
    pub title: &'a str,
    pub format: PageFormat,
}

/// Self-contained markup ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteDocument {
    html: String,
}

impl CompleteDocument {
    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn len(&self) -> usize {
        self.html.len()
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }
}

/// Wraps caller markup into one deterministic document. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        html_body: &str,
        css_text: &str,
        options: &DocumentOptions<'_>,
    ) -> CompleteDocument {
        let user_css = normalize_css(css_text);
        let title = escape_text(options.title);
        let page_rule = format!(
            "@page {{ margin: {PAGE_MARGIN}; size: {}; }}",
            options.format.as_str()
        );

        let mut html = String::with_capacity(
            html_body.len() + user_css.len() + PRINT_SAFETY_CSS.len() + 512,
        );
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("<meta charset=\"UTF-8\">\n");
        html.push_str(
            "<meta name=\"viewport\" content=\"width=device-width,initial-scale=1.0\">\n",
        );
        html.push_str("<meta name=\"generator\" content=\"pressroom\">\n");
        html.push_str("<title>");
        html.push_str(&title);
        html.push_str("</title>\n<style>\n");
        if !user_css.is_empty() {
            html.push_str(&user_css);
            html.push('\n');
        }
        html.push_str(PRINT_SAFETY_CSS);
        html.push('\n');
        html.push_str(&page_rule);
        html.push_str("\n</style>\n</head>\n<body>");
        html.push_str(html_body);
        html.push_str("</body>\n</html>");

        CompleteDocument { html }
    }
}

fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
