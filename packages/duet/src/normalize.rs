//! Dialogue script normalization and the final text handed to the model.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `[S1]`, `[S2]`, …
static SPEAKER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[S(\d+)\]").expect("speaker tag pattern"));
/// Bare numeric tags such as `[1]`.
static NUMERIC_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("numeric tag pattern"));
/// Any bracketed span.
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]*)\]").expect("bracket pattern"));
static LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\[S\d+\])\s*").expect("leading tag pattern"));
static CJK_LAUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"哈{2,}").expect("laugh pattern"));
static EN_LAUGH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bha(?:\s*ha)+\b").expect("laugh pattern"));

const DECORATIVE: &[char] = &[
    '【', '】', '《', '》', '（', '）', '『', '』', '「', '」', '"', '-', '“', '”', '~', '～',
];

/// Text normalization seam.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

impl<F> Normalizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn normalize(&self, text: &str) -> String {
        self(text)
    }
}

/// Rule-based cleanup for two-speaker scripts (CJK and Latin punctuation).
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogueNormalizer;

impl Normalizer for DialogueNormalizer {
    fn normalize(&self, text: &str) -> String {
        normalize_text(text)
    }
}

struct Segment {
    tag: String,
    content: String,
}

pub fn normalize_text(text: &str) -> String {
    let text = NUMERIC_TAG.replace_all(text, "[S$1]");
    let text = BRACKETED.replace_all(&text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        if SPEAKER_TAG.find(whole).is_some_and(|m| m.as_str() == whole) {
            whole.to_string()
        } else {
            caps[1].to_string()
        }
    });
    let text = text.replace(['\r', '\n'], " ");

    let mut segments: Vec<Segment> = Vec::new();
    for raw in split_on_tags(&text) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (tag, body) = match LEADING_TAG.captures(raw) {
            Some(caps) => (caps[1].to_string(), &raw[caps[0].len()..]),
            None => (String::new(), raw),
        };
        segments.push(Segment {
            tag,
            content: clean_segment(body),
        });
    }

    let mut out = String::with_capacity(text.len());
    let mut iter = segments.into_iter().peekable();
    while let Some(first) = iter.next() {
        let mut line = first.tag.clone();
        line.push_str(&first.content);
        while let Some(next) = iter.peek() {
            if first.tag.is_empty() || next.tag != first.tag {
                break;
            }
            line.push_str(&next.content);
            iter.next();
        }
        out.push_str(line.trim());
    }

    out.replace(['‘', '’'], "'")
}

/// Split `text` in front of every speaker tag, keeping the tags.
fn split_on_tags(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for m in SPEAKER_TAG.find_iter(text) {
        if m.start() > start {
            parts.push(&text[start..m.start()]);
        }
        start = m.start();
    }
    parts.push(&text[start..]);
    parts
}

fn clean_segment(body: &str) -> String {
    let content: String = body.chars().filter(|c| !DECORATIVE.contains(c)).collect();
    let content = CJK_LAUGH.replace_all(&content, "(笑)");
    let content = EN_LAUGH.replace_all(&content, "(laughs)");
    let content = content
        .replace("——", "，")
        .replace("……", "，")
        .replace(['；', '：', '、'], "，")
        .replace([';', ':'], ",");
    let content = content.trim();

    // only the last sentence mark survives as a full stop
    let mut chars: Vec<char> = content.chars().collect();
    if chars.len() > 1 {
        let last = match chars.pop() {
            Some('，') => '。',
            Some(',') => '.',
            Some(other) => other,
            None => return String::new(),
        };
        let mut body: String = chars
            .into_iter()
            .map(|c| if c == '。' { '，' } else { c })
            .collect();
        body.push(last);
        return body;
    }
    content.to_string()
}

/// Exact string fed to the model: a leading speaker tag is guaranteed on
/// non-empty text and `[Sn]` becomes `<speakern>`.
pub fn final_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let tagged = if LEADING_TAG.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("[S1]{trimmed}")
    };
    SPEAKER_TAG.replace_all(&tagged, "<speaker$1>").into_owned()
}
