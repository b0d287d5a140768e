use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use concierge_core::config::CHANNEL_HARD_CHUNK_LIMIT;
use concierge_core::domain::response::AiResponse;

use crate::{FormatError, ResponseFormatter};

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1600;

/// Formats responses for WhatsApp text messages.
///
/// Markdown produced by the model is rewritten into WhatsApp's inline syntax, then the text
/// is split at paragraph, sentence and finally word boundaries so that no chunk exceeds
/// `max_chunk_chars` characters.
#[derive(Clone, Debug)]
pub struct WhatsAppFormatter {
    max_chunk_chars: usize,
}

impl Default for WhatsAppFormatter {
    fn default() -> Self {
        Self { max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS }
    }
}

impl WhatsAppFormatter {
    pub fn new(max_chunk_chars: usize) -> Result<Self, FormatError> {
        if max_chunk_chars == 0 || max_chunk_chars > CHANNEL_HARD_CHUNK_LIMIT {
            return Err(FormatError::InvalidLimit(max_chunk_chars));
        }
        Ok(Self { max_chunk_chars })
    }

    pub fn max_chunk_chars(&self) -> usize {
        self.max_chunk_chars
    }

    pub fn render(&self, content: &str) -> Result<Vec<String>, FormatError> {
        let normalized = normalize_markdown(content);
        if normalized.is_empty() {
            return Err(FormatError::EmptyContent);
        }
        let chunks = split_into_chunks(&normalized, self.max_chunk_chars);
        debug!(
            event_name = "channel.whatsapp.formatted",
            chunk_count = chunks.len(),
            max_chunk_chars = self.max_chunk_chars,
            "formatted response for whatsapp"
        );
        Ok(chunks)
    }
}

#[async_trait]
impl ResponseFormatter for WhatsAppFormatter {
    async fn format(&self, response: &AiResponse) -> Result<Vec<String>, FormatError> {
        self.render(&response.content)
    }
}

struct MarkdownRules {
    bold: Regex,
    underscore_bold: Regex,
    strike: Regex,
    heading: Regex,
    bullet: Regex,
    link: Regex,
    blank_runs: Regex,
}

fn rules() -> &'static MarkdownRules {
    static RULES: OnceLock<MarkdownRules> = OnceLock::new();
    RULES.get_or_init(|| MarkdownRules {
        bold: Regex::new(r"\*\*(.+?)\*\*").expect("bold pattern is a compile-time constant"),
        underscore_bold: Regex::new(r"__(.+?)__")
            .expect("underscore pattern is a compile-time constant"),
        strike: Regex::new(r"~~(.+?)~~").expect("strike pattern is a compile-time constant"),
        heading: Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$")
            .expect("heading pattern is a compile-time constant"),
        bullet: Regex::new(r"(?m)^([ \t]*)[-*+][ \t]+")
            .expect("bullet pattern is a compile-time constant"),
        link: Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)")
            .expect("link pattern is a compile-time constant"),
        blank_runs: Regex::new(r"\n{3,}").expect("blank-run pattern is a compile-time constant"),
    })
}

/// Rewrites common markdown into WhatsApp formatting.
pub fn normalize_markdown(content: &str) -> String {
    let rules = rules();
    let text = content.replace("\r\n", "\n");
    // Bullets first so `* item` is not mistaken for emphasis.
    let text = rules.bullet.replace_all(&text, "$1• ");
    let text = rules.heading.replace_all(&text, "*$1*");
    let text = rules.bold.replace_all(&text, "*$1*");
    let text = rules.underscore_bold.replace_all(&text, "_${1}_");
    let text = rules.strike.replace_all(&text, "~$1~");
    let text = rules.link.replace_all(&text, "$1 ($2)");
    let text = rules.blank_runs.replace_all(&text, "\n\n");

    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n").trim().to_string()
}

/// Splits `text` into chunks of at most `limit` characters.
pub fn split_into_chunks(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        for piece in fit_paragraph(paragraph, limit) {
            append_piece(&mut chunks, &mut current, &piece, "\n\n", limit);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn append_piece(
    chunks: &mut Vec<String>,
    current: &mut String,
    piece: &str,
    separator: &str,
    limit: usize,
) {
    if current.is_empty() {
        current.push_str(piece);
        return;
    }

    let joined_len = char_len(current) + char_len(separator) + char_len(piece);
    if joined_len <= limit {
        current.push_str(separator);
        current.push_str(piece);
    } else {
        chunks.push(std::mem::take(current));
        current.push_str(piece);
    }
}

/// Breaks one paragraph into pieces that each fit within `limit`.
fn fit_paragraph(paragraph: &str, limit: usize) -> Vec<String> {
    if char_len(paragraph) <= limit {
        return vec![paragraph.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(paragraph) {
        if char_len(sentence) > limit {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_words(sentence, limit));
            continue;
        }
        append_piece(&mut pieces, &mut current, sentence, " ", limit);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        let terminal = matches!(ch, '.' | '!' | '?' | '\n');
        let at_boundary = chars.peek().map(|(_, next)| next.is_whitespace()).unwrap_or(true);
        if terminal && at_boundary {
            let end = index + ch.len_utf8();
            let sentence = paragraph[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn split_words(sentence: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        if char_len(word) > limit {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(limit).map(|chunk| chunk.iter().collect::<String>()));
            continue;
        }
        append_piece(&mut pieces, &mut current, word, " ", limit);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}
