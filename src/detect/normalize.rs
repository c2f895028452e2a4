// src/detect/normalize.rs
use once_cell::sync::OnceCell;
use regex::Regex;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// Reduce rich text to comparable plain text.
///
/// Block-level tags become line breaks, links keep their target, images keep
/// their source, every other tag is dropped. Entities are decoded, whitespace
/// is collapsed per line and blank lines are removed, so cosmetic markup
/// changes do not register as edits while wording or link changes do.
pub fn html_to_text(html: &str) -> String {
    static RE_LINK: OnceCell<Regex> = OnceCell::new();
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCK: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    // 1) Links → "text (href)"
    let link = re(
        &RE_LINK,
        r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#,
    );
    let out = link.replace_all(html, "$2 ($1)");

    // 2) Images → "[image: src]"
    let img = re(
        &RE_IMG,
        r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']*)["'][^>]*>"#,
    );
    let out = img.replace_all(&out, "[image: $1]");

    // 3) Block boundaries → newline
    let block = re(
        &RE_BLOCK,
        r"(?is)<br\s*/?>|</?(p|div|li|ul|ol|h[1-6]|blockquote|tr|table)\b[^>]*>",
    );
    let out = block.replace_all(&out, "\n");

    // 4) Strip remaining tags, then decode entities
    let tags = re(&RE_TAGS, r"(?is)</?[^>]+>");
    let out = tags.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).to_string();

    // 5) Collapse whitespace per line, drop blank lines
    let ws = re(&RE_WS, r"[^\S\n]+");
    out.lines()
        .map(|line| ws.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalized form of an optional body; absent and empty compare equal.
pub fn normalized_content(content: Option<&str>) -> String {
    content.map(html_to_text).unwrap_or_default()
}
