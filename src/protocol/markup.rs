//! Message body markup.
//!
//! Posted bodies carry an optional `<n.../>` name-color tag, an optional
//! `<f ...>` font tag and arbitrary HTML. Ingest needs the plain text plus
//! the two tag payloads; nothing else of the markup is interpreted.

use regex::Regex;
use std::sync::LazyLock;

static NAME_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<n(.*?)/>").expect("valid regex"));
static FONT_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<f(.*?)>").expect("valid regex"));

/// Seed used by the anon-id rule when a message carries no name tag.
pub const DEFAULT_ANON_SEED: &str = "5504";

/// Placeholder id for anonymous users whose seed or session id is not numeric.
pub const INVALID_ANON_ID: &str = "NNNN";

/// Plain text of a message body plus the tag payloads found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedMessage {
    pub body: String,
    /// Contents of the first `<n.../>` tag
    pub name_tag: Option<String>,
    /// Contents of the first `<f...>` tag
    pub font_tag: Option<String>,
}

/// Font attributes parsed out of an `<f ...>` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    pub color: Option<String>,
    pub face: String,
    pub size: u32,
}

/// Strips name/font tags and HTML, then unescapes entities.
pub fn clean_message(raw: &str) -> CleanedMessage {
    let name_tag = NAME_TAG.captures(raw).map(|c| c[1].to_string());
    let font_tag = FONT_TAG.captures(raw).map(|c| c[1].to_string());

    let without_name = NAME_TAG.replace_all(raw, "");
    let without_font = FONT_TAG.replace_all(&without_name, "");
    let body = unescape(&strip_html(&without_font));

    CleanedMessage {
        body,
        name_tag,
        font_tag,
    }
}

/// Removes everything between `<` and the next `>`.
///
/// A `<` with no closing `>` drops the rest of that segment, like the
/// server's own sanitiser does.
pub fn strip_html(msg: &str) -> String {
    let mut segments = msg.split('<');
    let mut out = String::with_capacity(msg.len());

    if let Some(head) = segments.next() {
        out.push_str(head);
    }
    for segment in segments {
        if let Some((_, text)) = segment.split_once('>') {
            out.push_str(text);
        }
    }
    out
}

fn unescape(msg: &str) -> String {
    msg.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Escapes `<` and `>` for bodies sent with HTML disabled.
pub fn escape_html(msg: &str) -> String {
    msg.replace('<', "&lt;").replace('>', "&gt;")
}

/// Parses the payload of a font tag, e.g. ` x12F00="Arial"`.
///
/// Anything not shaped like `x<size><color>="<face>"` yields `None`.
pub fn parse_font(tag: &str) -> Option<FontInfo> {
    let (size_color, _) = tag.split_once('=')?;
    let size_color = size_color.trim();

    let size = size_color
        .get(1..size_color.len().min(3))?
        .trim()
        .parse::<u32>()
        .ok()?;

    let color = size_color
        .get(3.min(size_color.len())..size_color.len().min(6))
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let face = tag.split('"').nth(1)?.to_string();

    Some(FontInfo { color, face, size })
}

/// Derives the 4-digit display id of an anonymous participant.
///
/// Each digit of `seed` is added to the matching digit of `ssid[4..]` and
/// only the last digit of each sum is kept. Any non-digit in either input
/// gives [`INVALID_ANON_ID`].
///
/// ```
/// use roomwire::protocol::anon_id;
///
/// assert_eq!(anon_id(Some("1234"), "12345678"), "6802");
/// assert_eq!(anon_id(Some("12a4"), "12345678"), "NNNN");
/// ```
pub fn anon_id(seed: Option<&str>, ssid: &str) -> String {
    let seed = seed.unwrap_or(DEFAULT_ANON_SEED);

    let digits = |s: &str| -> Option<Vec<u32>> { s.chars().map(|c| c.to_digit(10)).collect() };

    let tail: String = ssid.chars().skip(4).collect();
    match (digits(seed), digits(&tail)) {
        (Some(a), Some(b)) => a
            .iter()
            .zip(b.iter())
            .filter_map(|(x, y)| char::from_digit((x + y) % 10, 10))
            .collect(),
        _ => INVALID_ANON_ID.to_string(),
    }
}

/// Title-cases a login name the way the server displays it.
pub fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut at_word_start = true;
    for c in name.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
