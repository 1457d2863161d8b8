use chrono::DateTime;
use url::Url;

// ---------------------------------------------------------------------------
// Plain-text extraction
// ---------------------------------------------------------------------------

/// Render width handed to html2text. The output is collapsed to a single
/// line afterwards, so the exact value only affects intermediate wrapping.
const TEXT_WIDTH: usize = 400;

/// Maximum number of author characters kept in the byline before truncation.
const AUTHOR_MAX_CHARS: usize = 50;

/// Extract readable plain text from an HTML fragment.
///
/// Empty input yields empty output, never an error. When extraction
/// produces nothing for non-empty input, the raw text is kept
/// (whitespace-collapsed) rather than losing the field.
pub fn extract_plain_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let text = collapse_whitespace(&html2text::from_read(html.as_bytes(), TEXT_WIDTH));
    if text.is_empty() {
        collapse_whitespace(html)
    } else {
        text
    }
}

/// Remove `<style>…</style>` blocks before text extraction. Inline CSS would
/// otherwise leak into the rendered body text. An unterminated block swallows
/// the remainder of the input.
pub fn strip_style_block(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut at = 0;
    while let Some(pos) = lower[at..].find("<style") {
        let start = at + pos;
        out.push_str(&html[at..start]);
        match lower[start..].find("</style>") {
            Some(end) => at = start + end + "</style>".len(),
            None => return out,
        }
    }
    out.push_str(&html[at..]);
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Image scanning
// ---------------------------------------------------------------------------

/// Find the first `<img src=…>` in an HTML body whose URL uses an allowed
/// scheme (`http`, `https`, `file`). Tags with relative or exotic-scheme
/// sources are skipped rather than treated as a match.
pub fn first_image_url(html: &str) -> Option<Url> {
    let lower = html.to_ascii_lowercase();
    let mut at = 0;
    while let Some(pos) = lower[at..].find("<img") {
        let tag_start = at + pos;
        let tag_end = lower[tag_start..]
            .find('>')
            .map(|e| tag_start + e)
            .unwrap_or(lower.len());

        if let Some(raw) = src_attribute(&lower[tag_start..tag_end], &html[tag_start..tag_end]) {
            if let Ok(url) = Url::parse(raw.trim()) {
                if matches!(url.scheme(), "http" | "https" | "file") {
                    return Some(url);
                }
            }
        }

        if tag_end <= tag_start {
            break;
        }
        at = tag_end;
    }
    None
}

/// Pull the value of a `src` attribute out of one tag. `lower` and `orig`
/// are the same slice in different cases; offsets are shared.
fn src_attribute<'a>(lower: &str, orig: &'a str) -> Option<&'a str> {
    let mut search = 0;
    while let Some(rel) = lower[search..].find("src") {
        let idx = search + rel;
        // Require a whitespace separator so `data-src` does not match.
        let preceded_ok = lower[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_whitespace());
        if preceded_ok {
            let rest = orig[idx + 3..].trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                let value = value.trim_start();
                return Some(match value.chars().next() {
                    Some(q @ ('"' | '\'')) => {
                        let inner = &value[1..];
                        match inner.find(q) {
                            Some(end) => &inner[..end],
                            None => inner,
                        }
                    }
                    _ => value
                        .split(|c: char| c.is_whitespace())
                        .next()
                        .unwrap_or(value),
                });
            }
        }
        search = idx + 3;
    }
    None
}

// ---------------------------------------------------------------------------
// Byline composition
// ---------------------------------------------------------------------------

/// Compose the cached `date | author` line shown under an article title.
///
/// The author is appended only when present; newlines are stripped before
/// the length check, and anything longer than 50 characters is truncated
/// with a trailing ellipsis.
pub fn date_feed_author(pub_date: i64, author: Option<&str>) -> String {
    let date = format_pub_date(pub_date);
    match author.map(clean_author).filter(|a| !a.is_empty()) {
        Some(author) => format!("{date} | {author}"),
        None => date,
    }
}

/// Format a unix timestamp as a short human-readable date.
pub fn format_pub_date(pub_date: i64) -> String {
    match DateTime::from_timestamp(pub_date, 0) {
        Some(dt) => dt.format("%-d %b %Y").to_string(),
        None => String::new(),
    }
}

fn clean_author(author: &str) -> String {
    let flat: String = author
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    let flat = flat.trim();
    if flat.chars().count() > AUTHOR_MAX_CHARS {
        let mut truncated: String = flat.chars().take(AUTHOR_MAX_CHARS).collect();
        truncated.push('…');
        truncated
    } else {
        flat.to_string()
    }
}
