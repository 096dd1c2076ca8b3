//! Property-based tests for the call router
//!
//! These tests verify key invariants hold across all possible inputs.

use super::*;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_marker() -> impl Strategy<Value = ProgressMarker> {
    prop::sample::select(ProgressMarker::ALL.to_vec())
}

fn arb_low_confidence() -> impl Strategy<Value = f32> {
    0.0f32..LOW_CONFIDENCE_THRESHOLD
}

fn arb_speech() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z ]{1,30}",
        "[ぁ-んァ-ン]{1,20}",
        " {0,4}",
        Just("はい、お願いします".to_string()),
        Just("どちら様ですか".to_string()),
        Just("ただいま不在です".to_string()),
    ]
}

/// Keywords from every group that can precede rejection in a sentence
fn arb_other_keyword() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "どちら様",
        "会社名",
        "不在",
        "会議中",
        "ホームページ",
        "メール",
        "はい",
        "お願い",
        "担当者",
    ])
}

proptest! {
    #[test]
    fn prop_low_confidence_keeps_marker(
        marker in arb_marker(),
        text in arb_speech(),
        confidence in arb_low_confidence(),
        retries in 0..MAX_RETRIES,
    ) {
        let decision = decide(&Turn::new(marker, Some(&text), Some(confidence)).with_retries(retries));

        prop_assert_eq!(decision.action, NextAction::Continue(marker));
        prop_assert_eq!(decision.retries, retries + 1);
        prop_assert!(!decision.generate_reply);
    }

    #[test]
    fn prop_rejection_always_hangs_up(
        prefix in arb_other_keyword(),
        suffix in arb_other_keyword(),
        retries in 0..=MAX_RETRIES,
    ) {
        let text = format!("{prefix}、でもお断りします。{suffix}");
        let decision = decide(
            &Turn::new(ProgressMarker::CheckAvailability, Some(&text), Some(0.95)).with_retries(retries),
        );

        prop_assert_eq!(decision.action, NextAction::Hangup);
        prop_assert!(!decision.utterances.is_empty());
    }

    #[test]
    fn prop_company_name_beats_affirmative(
        affirmative in prop::sample::select(vec!["はい", "大丈夫", "お願い", "詳しく"]),
        company in prop::sample::select(vec!["どちら様", "会社名", "どこの会社"]),
        company_first in any::<bool>(),
    ) {
        let text = if company_first {
            format!("{company}ですか？{affirmative}")
        } else {
            format!("{affirmative}、{company}ですか？")
        };
        let decision = decide(&Turn::new(ProgressMarker::CheckAvailability, Some(&text), Some(0.9)));

        prop_assert_eq!(decision.branch, "company_name");
        prop_assert_eq!(decision.action, NextAction::Continue(ProgressMarker::CheckAvailability));
    }

    #[test]
    fn prop_retries_never_exceed_cap(
        marker in arb_marker(),
        text in proptest::option::of(arb_speech()),
        confidence in proptest::option::of(0.0f32..1.0),
        retries in 0..10u32,
    ) {
        let decision = decide(&Turn::new(marker, text.as_deref(), confidence).with_retries(retries));

        prop_assert!(decision.retries <= MAX_RETRIES);
        // Low-confidence re-asks always count toward the cap
        if decision.branch == "low_confidence" {
            prop_assert!(decision.retries > 0);
        }
    }

    #[test]
    fn prop_arbitrary_step_param_is_total(param in ".{0,24}", text in proptest::option::of(".{0,40}")) {
        let marker = ProgressMarker::from_param(Some(&param));
        let decision = decide(&Turn::new(marker, text.as_deref(), Some(0.8)));

        // Every decision either speaks something, hands off, or asks the model.
        prop_assert!(
            !decision.utterances.is_empty()
                || decision.generate_reply
                || decision.action == NextAction::Hangup
        );
    }
}
