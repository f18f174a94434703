//! Synthesis requests: the raw record a caller supplies and the validated,
//! mode-tagged item the orchestrator consumes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Root used to resolve relative prompt audio when a record has no `base_path`.
pub const DEFAULT_BASE_PATH: &str = "examples";

/// One line of a record stream, exactly as the caller wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Dialogue script with embedded `[S1]` / `[S2]` tags.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_normalize: Option<bool>,

    // single reference voice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,

    // one reference voice per speaker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_audio_speaker1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text_speaker1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_audio_speaker2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text_speaker2: Option<String>,
}

impl RawRecord {
    /// A record with only a script and every optional field left empty.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Root for relative prompt audio.
    pub fn base_path(&self) -> &Path {
        Path::new(self.base_path.as_deref().unwrap_or(DEFAULT_BASE_PATH))
    }
}

/// Dialogue speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpeakerId {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl SpeakerId {
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Script tag, e.g. `[S1]`.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::One => "[S1]",
            Self::Two => "[S2]",
        }
    }
}

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "speaker{}", self.number())
    }
}

/// Reference audio plus its transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRef {
    /// Audio path, already resolved against the record's base path.
    pub audio: PathBuf,
    /// Transcript of `audio`; empty when the caller gave none.
    pub text: String,
}

impl PromptRef {
    pub fn new(audio: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            audio: audio.into(),
            text: text.into(),
        }
    }
}

/// Which reference voices accompany a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditioningMode {
    None,
    Single,
    Role,
}

impl fmt::Display for ConditioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Single => "SINGLE",
            Self::Role => "ROLE",
        })
    }
}

/// Reference voices of a request. Exactly one shape is ever populated, so
/// the mode can't drift from the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Conditioning {
    None,
    Single(PromptRef),
    Role {
        speaker1: PromptRef,
        speaker2: PromptRef,
    },
}

impl Conditioning {
    pub fn mode(&self) -> ConditioningMode {
        match self {
            Self::None => ConditioningMode::None,
            Self::Single(_) => ConditioningMode::Single,
            Self::Role { .. } => ConditioningMode::Role,
        }
    }

    pub fn single_prompt(&self) -> Option<&PromptRef> {
        match self {
            Self::Single(prompt) => Some(prompt),
            _ => None,
        }
    }

    /// Per-speaker prompts in speaker order, only in role mode.
    pub fn role_prompts(&self) -> Option<[(SpeakerId, &PromptRef); 2]> {
        match self {
            Self::Role { speaker1, speaker2 } => {
                Some([(SpeakerId::One, speaker1), (SpeakerId::Two, speaker2)])
            }
            _ => None,
        }
    }

    /// Transcript that precedes the script: the single prompt's text, or
    /// both speaker transcripts behind their tags. A transcript that already
    /// opens with its speaker's tag is not tagged twice.
    pub fn prompt_script(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Single(prompt) => prompt.text.clone(),
            Self::Role { speaker1, speaker2 } => format!(
                "{}{}",
                tagged(SpeakerId::One, &speaker1.text),
                tagged(SpeakerId::Two, &speaker2.text)
            ),
        }
    }
}

fn tagged(speaker: SpeakerId, text: &str) -> String {
    let tag = speaker.tag();
    if text.trim_start().starts_with(tag) {
        text.trim_start().to_string()
    } else {
        format!("{tag}{text}")
    }
}

/// One validated synthesis request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    text: String,
    conditioning: Conditioning,
    normalize: bool,
}

impl RequestItem {
    pub fn new(text: impl Into<String>, conditioning: Conditioning, normalize: bool) -> Self {
        Self {
            text: text.into(),
            conditioning,
            normalize,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn conditioning(&self) -> &Conditioning {
        &self.conditioning
    }

    pub fn conditioning_mode(&self) -> ConditioningMode {
        self.conditioning.mode()
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }
}
