//! Text helpers shared by components: links, escaping, trimming and anonymised hashes.

pub mod alerts;
mod runtime;

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{ComponentError, ComponentResult};

pub use alerts::TelegramAlertsLayer;
pub use runtime::{restart_on_errors, LockRegistry};

/// Chat reference for message links: numeric id or public `@handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRef<'a> {
    Id(i64),
    Handle(&'a str),
}

impl From<i64> for ChatRef<'_> {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for ChatRef<'a> {
    fn from(handle: &'a str) -> Self {
        Self::Handle(handle)
    }
}

/// Public link to a message.
///
/// A comment to a channel post can be linked two ways: from the discussion chat with
/// `thread_op_message_id` (the post's copy there), or from the channel with `comment_message_id`.
/// Using both at once is an error.
pub fn telegram_message_url<'a>(
    chat: impl Into<ChatRef<'a>>,
    message_id: i32,
    thread_op_message_id: Option<i32>,
    comment_message_id: Option<i32>,
) -> ComponentResult<String> {
    if thread_op_message_id.is_some() && comment_message_id.is_some() {
        return Err(ComponentError::Other(
            "thread and comment can't be used together".to_string(),
        ));
    }
    let route = match chat.into() {
        ChatRef::Id(id) => {
            let id = id.to_string();
            format!("c/{}", id.strip_prefix("-100").unwrap_or(&id))
        }
        ChatRef::Handle(handle) => handle.trim_matches(|c| c == '@' || c == ' ').to_string(),
    };
    let mut url = format!("https://t.me/{}/{}", route, message_id);
    if let Some(thread) = thread_op_message_id {
        url.push_str(&format!("?thread={}", thread));
    }
    if let Some(comment) = comment_message_id {
        url.push_str(&format!("?comment={}", comment));
    }
    Ok(url)
}

/// Cuts `message` at a word boundary past `target_len` characters and appends `...`.
pub fn trim_with_ellipsis(message: &str, target_len: usize) -> String {
    if message.chars().count() <= target_len {
        return message.to_string();
    }
    let mut words = Vec::new();
    let mut current_len = 0;
    for word in message.split_whitespace() {
        words.push(word);
        current_len += word.chars().count() + 1;
        if current_len > target_len {
            return format!("{}...", words.join(" "));
        }
    }
    message.to_string()
}

/// Joins non-empty paragraphs with a blank line.
pub fn join_paragraphs<S: AsRef<str>>(paragraphs: &[S]) -> String {
    paragraphs
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Escapes the three characters Telegram's HTML parse mode cares about.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn html_link(href: &str, text: &str) -> String {
    format!("<a href=\"{}\">{}</a>", href, html_escape(text))
}

pub fn markdown_link(href: &str, text: &str) -> String {
    format!("[{}]({})", text, href)
}

/// `some-very-secret-string` → `some-ver***************` for `open_ratio` ≈ 0.35.
pub fn mask(text: &str, open_ratio: f64) -> String {
    let open_ratio = open_ratio.clamp(0.0, 1.0);
    let len = text.chars().count();
    let open = (len as f64 * open_ratio).floor() as usize;
    text.chars()
        .take(open)
        .chain(std::iter::repeat('*').take(len - open))
        .collect()
}

/// Normalises an indented multiline literal: lines are stripped, single newlines inside a
/// paragraph become spaces, blank lines separate paragraphs.
pub fn long_text(text: &str) -> String {
    let cleaned = text
        .trim()
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    cleaned
        .split("\n\n")
        .map(|p| p.lines().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fills `{}` placeholders in order, e.g. templates configured as `"retrying in {} sec"`.
/// Extra placeholders stay as they are; extra arguments are ignored.
pub fn fill_placeholders(template: &str, args: &[&dyn std::fmt::Display]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        result.push_str(&rest[..pos]);
        match args.next() {
            Some(arg) => result.push_str(&arg.to_string()),
            None => result.push_str("{}"),
        }
        rest = &rest[pos + 2..];
    }
    result.push_str(rest);
    result
}

/// `H:MM:SS`, prefixed with days when longer than a day: `0:01:00`, `2 days, 3:00:00`.
pub fn format_duration(duration: std::time::Duration) -> String {
    let total = duration.as_secs();
    let (days, rest) = (total / 86_400, total % 86_400);
    let clock = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

static COMMAND_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^/(?P<command>\w+)(@(?P<bot_username>\w{5,64}))?"));

/// `/cmd@my_bot  rest` → `rest`.
pub fn remove_command_prefix(text: &str) -> String {
    match COMMAND_RE.as_ref() {
        Ok(re) => re.replace(text, "").trim().to_string(),
        Err(_) => text.trim().to_string(),
    }
}

const EMOJI: &[&str] = &[
    "🐶", "🐱", "🐭", "🐹", "🐰", "🦊", "🐻", "🐼", "🐨", "🐯", "🦁", "🐮", "🐷", "🐸", "🐵", "🐔",
    "🐧", "🐦", "🐤", "🦆", "🦅", "🦉", "🦇", "🐺", "🐗", "🐴", "🦄", "🐝", "🐛", "🦋", "🐌", "🐞",
    "🐢", "🐍", "🦎", "🐙", "🦑", "🦀", "🐠", "🐬", "🐳", "🦈", "🐊", "🐘", "🦒", "🐪", "🦘", "🐿",
    "🌵", "🌲", "🌴", "🍀", "🍁", "🍄", "🌻", "🌹", "🌷", "🌼", "🌙", "⭐", "🔥", "🌈", "☔", "❄",
    "🍏", "🍊", "🍋", "🍌", "🍉", "🍇", "🍓", "🍒", "🍑", "🍍", "🥝", "🥑", "🍆", "🥕", "🌽", "🥐",
    "🧀", "🍕", "🍔", "🌮", "🍩", "🍪", "🎂", "🍭", "☕", "🎈", "🎁", "🎲", "🎯", "🎸", "🎺", "🚀",
];

const TEXT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Stable pseudonymous signature: hashes the sign, the 64-byte big-endian magnitude and the bot
/// prefix, then maps consecutive byte pairs onto `alphabet`. Not for security use.
fn pretty_hash(some_id: i64, bot_prefix: &str, length: usize, alphabet: &[&str]) -> ComponentResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(if some_id > 0 { b"+" } else { b"-" });
    let mut abs_bytes = [0u8; 64];
    abs_bytes[56..].copy_from_slice(&some_id.unsigned_abs().to_be_bytes());
    hasher.update(abs_bytes);
    hasher.update(bot_prefix.as_bytes());
    let digest = hasher.finalize();

    let max_length = digest.len() / 2;
    if length > max_length {
        return Err(ComponentError::Other(format!(
            "hash length {} can't exceed {}",
            length, max_length
        )));
    }
    Ok(digest
        .chunks_exact(2)
        .take(length)
        .map(|pair| alphabet[u16::from_le_bytes([pair[0], pair[1]]) as usize % alphabet.len()])
        .collect())
}

/// Emoji signature for an id, e.g. `🦊🍕🐢🌙`.
pub fn emoji_hash(some_id: i64, bot_prefix: &str, length: usize) -> ComponentResult<String> {
    pretty_hash(some_id, bot_prefix, length, EMOJI)
}

/// Alphanumeric signature for an id, e.g. `aZ3kQ9`.
pub fn text_hash(some_id: i64, bot_prefix: &str, length: usize) -> ComponentResult<String> {
    let alphabet: Vec<&str> = (0..TEXT_ALPHABET.len())
        .map(|i| &TEXT_ALPHABET[i..i + 1])
        .collect();
    pretty_hash(some_id, bot_prefix, length, &alphabet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_message_url() {
        assert_eq!(
            telegram_message_url(-1001234567890i64, 42, None, None).unwrap(),
            "https://t.me/c/1234567890/42"
        );
        assert_eq!(
            telegram_message_url("@my_channel", 7, None, Some(99)).unwrap(),
            "https://t.me/my_channel/7?comment=99"
        );
        assert_eq!(
            telegram_message_url(-1001i64, 1, Some(5), None).unwrap(),
            "https://t.me/c/1/1?thread=5"
        );
        assert!(telegram_message_url(-1001i64, 1, Some(5), Some(6)).is_err());
    }

    #[test]
    fn test_trim_with_ellipsis() {
        assert_eq!(trim_with_ellipsis("short", 10), "short");
        assert_eq!(trim_with_ellipsis("hello brave new world", 10), "hello brave...");
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_secs(60)), "0:01:00");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 5)), "3:00:05");
        assert_eq!(format_duration(Duration::from_secs(86_400 + 30)), "1 day, 0:00:30");
        assert_eq!(format_duration(Duration::from_secs(2 * 86_400)), "2 days, 0:00:00");
    }

    #[test]
    fn test_join_paragraphs_skips_empty() {
        assert_eq!(join_paragraphs(&["a", "", "b"]), "a\n\nb");
        assert_eq!(join_paragraphs::<&str>(&[]), "");
    }

    #[test]
    fn test_html_helpers() {
        assert_eq!(html_escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(html_link("https://x.org", "<b>"), "<a href=\"https://x.org\">&lt;b&gt;</a>");
        assert_eq!(markdown_link("https://x.org", "x"), "[x](https://x.org)");
    }

    #[test]
    fn test_fill_placeholders() {
        assert_eq!(fill_placeholders("{} of {}", &[&1, &"two"]), "1 of two");
        assert_eq!(fill_placeholders("{} and {}", &[&1]), "1 and {}");
        assert_eq!(fill_placeholders("none", &[&1]), "none");
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("secret", 0.5), "sec***");
        assert_eq!(mask("secret", 2.0), "secret");
        assert_eq!(mask("secret", -1.0), "******");
    }

    #[test]
    fn test_long_text() {
        let text = "
            first line
            continues here

            second paragraph
        ";
        assert_eq!(long_text(text), "first line continues here\n\nsecond paragraph");
    }

    #[test]
    fn test_remove_command_prefix() {
        assert_eq!(remove_command_prefix("/start@my_bot  hello"), "hello");
        assert_eq!(remove_command_prefix("/log 2"), "2");
        assert_eq!(remove_command_prefix("no command"), "no command");
    }

    #[test]
    fn test_hashes_are_stable_and_prefix_dependent() {
        let a = emoji_hash(123, "bot", 4).unwrap();
        assert_eq!(a, emoji_hash(123, "bot", 4).unwrap());
        assert_ne!(a, emoji_hash(-123, "bot", 4).unwrap());
        assert_eq!(text_hash(5, "bot", 6).unwrap().len(), 6);
        assert_ne!(text_hash(5, "bot", 6).unwrap(), text_hash(5, "other", 6).unwrap());
        assert!(emoji_hash(1, "bot", 17).is_err());
    }
}
