use std::path::Path;

use duet::{RequestBuilder, build_request};
use duet_domain::{ConditioningMode, DuetError, RawRecord, SpeakerId};

fn role_record() -> RawRecord {
    RawRecord {
        base_path: Some("voices".into()),
        prompt_audio_speaker1: Some("alice.wav".into()),
        prompt_text_speaker1: Some("[S1]I'm Alice.".into()),
        prompt_audio_speaker2: Some("bob.wav".into()),
        prompt_text_speaker2: Some("[S2]I'm Bob.".into()),
        ..RawRecord::text("[S1]Hi[S2]Hi back")
    }
}

#[test]
fn both_role_fields_select_role_mode() {
    let item = build_request(&role_record()).unwrap();
    assert_eq!(item.conditioning_mode(), ConditioningMode::Role);

    let [(first, p1), (second, p2)] = item.conditioning().role_prompts().unwrap();
    assert_eq!((first, second), (SpeakerId::One, SpeakerId::Two));
    assert_eq!(p1.audio, Path::new("voices").join("alice.wav"));
    assert_eq!(p1.text, "[S1]I'm Alice.");
    assert_eq!(p2.audio, Path::new("voices").join("bob.wav"));
    assert_eq!(p2.text, "[S2]I'm Bob.");
}

#[test]
fn single_role_field_degrades_to_single_mode() {
    for keep_first in [true, false] {
        let mut raw = role_record();
        if keep_first {
            raw.prompt_audio_speaker2 = None;
        } else {
            raw.prompt_audio_speaker1 = None;
        }
        let item = build_request(&raw).unwrap();
        assert_eq!(item.conditioning_mode(), ConditioningMode::Single);

        let prompt = item.conditioning().single_prompt().unwrap();
        let (file, text) = if keep_first {
            ("alice.wav", "[S1]I'm Alice.")
        } else {
            ("bob.wav", "[S2]I'm Bob.")
        };
        assert_eq!(prompt.audio, Path::new("voices").join(file));
        assert_eq!(prompt.text, text);
    }
}

#[test]
fn strict_roles_rejects_partial_role_sets() {
    let mut raw = role_record();
    raw.prompt_audio_speaker2 = None;
    let err = RequestBuilder::default()
        .strict_roles(true)
        .build(&raw)
        .unwrap_err();
    assert!(matches!(err, DuetError::Validation(_)));
}

#[test]
fn single_plus_role_audio_is_contradictory() {
    let raw = RawRecord {
        prompt_audio: Some("narrator.wav".into()),
        prompt_text: Some("[S1]Narration.".into()),
        ..role_record()
    };
    let err = build_request(&raw).unwrap_err();
    match err {
        DuetError::Validation(msg) => assert!(msg.contains("supported prompt modes")),
        other => panic!("expected a validation error, got {other:?}"),
    }

}

#[test]
fn single_prompt_wins_over_a_partial_role_set() {
    for keep_first in [true, false] {
        let mut raw = RawRecord {
            prompt_audio: Some("narrator.wav".into()),
            prompt_text: Some("hello".into()),
            ..role_record()
        };
        if keep_first {
            raw.prompt_audio_speaker2 = None;
        } else {
            raw.prompt_audio_speaker1 = None;
        }
        let item = build_request(&raw).unwrap();
        assert_eq!(item.conditioning_mode(), ConditioningMode::Single);

        let prompt = item.conditioning().single_prompt().unwrap();
        assert_eq!(prompt.audio, Path::new("voices").join("narrator.wav"));
        assert_eq!(prompt.text, "hello");
    }

    // strict roles only guards records without a single prompt
    let raw = RawRecord {
        prompt_audio: Some("narrator.wav".into()),
        prompt_audio_speaker1: Some("alice.wav".into()),
        ..RawRecord::text("[S1]x")
    };
    let item = RequestBuilder::default().strict_roles(true).build(&raw).unwrap();
    assert_eq!(item.conditioning_mode(), ConditioningMode::Single);
}

#[test]
fn plain_script_has_no_conditioning() {
    let raw: RawRecord = serde_json::from_str(r#"{"text":"[S1]Hi[S2]Hi back"}"#).unwrap();
    let item = build_request(&raw).unwrap();
    assert_eq!(item.conditioning_mode(), ConditioningMode::None);
    assert_eq!(item.text(), "[S1]Hi[S2]Hi back");
    assert!(item.normalize());
}

#[cfg(unix)]
#[test]
fn absolute_prompt_paths_ignore_base_path() {
    let raw = RawRecord {
        prompt_audio: Some("/data/voice.wav".into()),
        ..RawRecord::text("[S1]x")
    };
    let item = build_request(&raw).unwrap();
    assert_eq!(
        item.conditioning().single_prompt().unwrap().audio,
        Path::new("/data/voice.wav")
    );
}
