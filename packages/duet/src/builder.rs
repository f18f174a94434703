//! Raw record → validated [`RequestItem`].
//!
//! Mode resolution is a priority-ordered match over which prompt fields
//! are populated. Partial role sets degrade to single-voice conditioning
//! unless [`RequestBuilder::strict_roles`] is switched on.

use std::path::{Path, PathBuf};

use duet_domain::{Conditioning, DuetError, DuetResult, PromptRef, RawRecord, RequestItem};
use tracing::{debug, warn};

const SUPPORTED_MODES: &str = "supported prompt modes are: single voice (`prompt_audio` + `prompt_text`) \
or one voice per speaker (`prompt_audio_speaker1` + `prompt_text_speaker1` and \
`prompt_audio_speaker2` + `prompt_text_speaker2`)";

/// Turns raw records into request items. Pure: touches no files.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder {
    strict_roles: bool,
    default_normalize: bool,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            strict_roles: false,
            default_normalize: true,
        }
    }
}

/// Build with the default (permissive) rules.
pub fn build_request(raw: &RawRecord) -> DuetResult<RequestItem> {
    RequestBuilder::default().build(raw)
}

impl RequestBuilder {
    /// Reject a record that names only one of the two speaker voices
    /// instead of falling back to single-voice conditioning.
    pub fn strict_roles(mut self, strict: bool) -> Self {
        self.strict_roles = strict;
        self
    }

    /// Normalization flag for records that omit `use_normalize`.
    pub fn default_normalize(mut self, normalize: bool) -> Self {
        self.default_normalize = normalize;
        self
    }

    pub fn build(&self, raw: &RawRecord) -> DuetResult<RequestItem> {
        let base = raw.base_path();
        let single = present(&raw.prompt_audio);
        let speaker1 = present(&raw.prompt_audio_speaker1);
        let speaker2 = present(&raw.prompt_audio_speaker2);

        let conditioning = match (single, speaker1, speaker2) {
            (Some(_), Some(_), Some(_)) => {
                return Err(DuetError::Validation(format!(
                    "record gives both single-voice and full per-speaker prompt audio; {SUPPORTED_MODES}"
                )));
            }
            (None, Some(a1), Some(a2)) => Conditioning::Role {
                speaker1: prompt(base, a1, &raw.prompt_text_speaker1),
                speaker2: prompt(base, a2, &raw.prompt_text_speaker2),
            },
            (Some(audio), _, _) => {
                if speaker1.is_some() || speaker2.is_some() {
                    debug!("incomplete speaker prompt set ignored in favour of prompt_audio");
                }
                Conditioning::Single(prompt(base, audio, &raw.prompt_text))
            }
            (None, Some(audio), None) | (None, None, Some(audio)) => {
                let (which, text) = if speaker1.is_some() {
                    (1, &raw.prompt_text_speaker1)
                } else {
                    (2, &raw.prompt_text_speaker2)
                };
                if self.strict_roles {
                    return Err(DuetError::Validation(format!(
                        "only speaker {which} has prompt audio; {SUPPORTED_MODES}"
                    )));
                }
                warn!(speaker = which, "only one speaker prompt supplied, using it as a single voice prompt");
                Conditioning::Single(prompt(base, audio, text))
            }
            (None, None, None) => {
                if present(&raw.prompt_text).is_some()
                    || present(&raw.prompt_text_speaker1).is_some()
                    || present(&raw.prompt_text_speaker2).is_some()
                {
                    debug!("prompt text without prompt audio is ignored");
                }
                Conditioning::None
            }
        };

        Ok(RequestItem::new(
            raw.text.clone(),
            conditioning,
            raw.use_normalize.unwrap_or(self.default_normalize),
        ))
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn prompt(base: &Path, audio: &str, text: &Option<String>) -> PromptRef {
    PromptRef::new(resolve(base, audio), text.clone().unwrap_or_default())
}

fn resolve(base: &Path, audio: &str) -> PathBuf {
    let audio = Path::new(audio);
    if audio.is_absolute() {
        audio.to_path_buf()
    } else {
        base.join(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_domain::ConditioningMode;

    #[test]
    fn relative_audio_is_joined_onto_base_path() {
        let raw = RawRecord {
            base_path: Some("voices".into()),
            prompt_audio: Some("a.wav".into()),
            ..RawRecord::text("[S1]hi")
        };
        let item = build_request(&raw).unwrap();
        let prompt = item.conditioning().single_prompt().unwrap();
        assert_eq!(prompt.audio, Path::new("voices").join("a.wav"));
        assert_eq!(prompt.text, "");
    }

    #[test]
    fn default_base_path_is_examples() {
        let raw = RawRecord {
            prompt_audio: Some("a.wav".into()),
            prompt_text: Some("[S1]hello".into()),
            ..RawRecord::text("[S1]hi")
        };
        let item = build_request(&raw).unwrap();
        assert_eq!(
            item.conditioning().single_prompt().unwrap().audio,
            Path::new("examples").join("a.wav")
        );
    }

    #[test]
    fn blank_fields_count_as_absent() {
        let raw = RawRecord {
            prompt_audio: Some("   ".into()),
            prompt_audio_speaker1: Some(String::new()),
            ..RawRecord::text("[S1]hi")
        };
        assert_eq!(build_request(&raw).unwrap().conditioning_mode(), ConditioningMode::None);
    }

    #[test]
    fn prompt_text_alone_does_not_select_a_mode() {
        let raw = RawRecord {
            prompt_text: Some("[S1]orphan".into()),
            ..RawRecord::text("[S1]hi")
        };
        assert_eq!(build_request(&raw).unwrap().conditioning_mode(), ConditioningMode::None);
    }

    #[test]
    fn record_flag_overrides_builder_default() {
        let builder = RequestBuilder::default().default_normalize(false);
        assert!(!builder.build(&RawRecord::text("x")).unwrap().normalize());
        let raw = RawRecord {
            use_normalize: Some(true),
            ..RawRecord::text("x")
        };
        assert!(builder.build(&raw).unwrap().normalize());
    }
}
