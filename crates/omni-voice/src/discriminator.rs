//! Echo / barge-in discrimination for captured caller speech.
//!
//! With the speaker and the microphone in the same room, the recognizer regularly re-hears
//! the dispatcher's own voice. A lexical-overlap check against the text most recently handed
//! to playback filters those echoes out; what survives is either an end-call command, an
//! interruption of ongoing playback, partial speech, or genuine caller input.

use crate::config::{BargeInConfig, EchoConfig};
use crate::recognition::Utterance;
use std::collections::HashSet;

/// Phrases that end the call when spoken on their own, or at the start or end of an utterance.
pub const END_CALL_PHRASES: &[&str] = &[
    "stop",
    "stop it",
    "shut up",
    "be quiet",
    "enough",
    "okay stop",
    "please stop",
    "stop talking",
    "end call",
    "hang up",
    "end",
    "thanks",
    "thank you",
    "bye",
    "goodbye",
    "that's all",
    "i'm done",
    "done",
    "ok thanks",
    "okay thanks",
];

/// Outcome of classifying one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Blank recognizer output.
    Empty,
    /// The recognizer heard our own playback; drop it.
    Echo,
    /// Caller asked to hang up.
    EndCallCommand,
    /// Caller speech over playback that is strong enough to stop it.
    BargeIn,
    /// Caller speech over playback that is too short or too uncertain to act on.
    BargeInCandidate,
    /// Partial caller speech, display only.
    Interim,
    /// A final caller utterance for the dispatcher.
    GenuineInput,
}

#[derive(Debug, Clone, Default)]
pub struct EchoDiscriminator {
    echo: EchoConfig,
    barge_in: BargeInConfig,
}

impl EchoDiscriminator {
    pub fn new(echo: EchoConfig, barge_in: BargeInConfig) -> Self {
        Self { echo, barge_in }
    }

    /// Classify `utterance` given what playback last spoke and whether it is still speaking.
    pub fn classify(
        &self,
        utterance: &Utterance,
        last_spoken: Option<&str>,
        is_speaking: bool,
    ) -> Classification {
        let text = normalize(&utterance.text);
        if text.is_empty() {
            return Classification::Empty;
        }

        if self.is_echo(&text, last_spoken) {
            return Classification::Echo;
        }

        if is_end_call_command(&text) {
            return Classification::EndCallCommand;
        }

        if is_speaking {
            return if self.promotes_barge_in(utterance) {
                Classification::BargeIn
            } else {
                Classification::BargeInCandidate
            };
        }

        if utterance.is_final {
            Classification::GenuineInput
        } else {
            Classification::Interim
        }
    }

    pub fn is_echo(&self, text: &str, last_spoken: Option<&str>) -> bool {
        match last_spoken {
            Some(spoken) if !spoken.trim().is_empty() => {
                self.match_ratio(text, spoken) > self.echo.match_ratio
            }
            _ => false,
        }
    }

    /// Share of the utterance's qualifying tokens that also occur in `spoken`.
    /// Zero when the utterance has no qualifying tokens.
    pub fn match_ratio(&self, text: &str, spoken: &str) -> f32 {
        let utterance_tokens = self.tokens(text);
        if utterance_tokens.is_empty() {
            return 0.0;
        }
        let spoken_tokens: HashSet<String> = self.tokens(spoken).into_iter().collect();
        let matched = utterance_tokens
            .iter()
            .filter(|t| spoken_tokens.contains(*t))
            .count();
        matched as f32 / utterance_tokens.len() as f32
    }

    fn promotes_barge_in(&self, utterance: &Utterance) -> bool {
        let len = utterance.text.trim().chars().count();
        let long_enough = if utterance.is_final {
            len >= self.barge_in.min_final_chars
        } else {
            len >= self.barge_in.min_interim_chars
        };
        long_enough && utterance.confidence > self.barge_in.min_confidence
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
            .filter(|w| w.chars().count() >= self.echo.min_token_chars)
            .map(str::to_string)
            .collect()
    }
}

/// Exact match, leading phrase or trailing phrase (on a word boundary) of the end-call set.
pub fn is_end_call_command(text: &str) -> bool {
    let text = normalize(text);
    END_CALL_PHRASES.iter().any(|phrase| {
        text == *phrase
            || text
                .strip_prefix(phrase)
                .is_some_and(|rest| rest.starts_with(' '))
            || text
                .strip_suffix(phrase)
                .is_some_and(|rest| rest.ends_with(' '))
    })
}

/// Lowercase, trim, and drop trailing sentence punctuation added by recognizers.
fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!', '?', ','])
        .trim()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn final_utt(text: &str, confidence: f32) -> Utterance {
        Utterance::final_text(text, confidence)
    }

    fn interim_utt(text: &str, confidence: f32) -> Utterance {
        Utterance::interim(text, confidence)
    }

    const LAST: &str = "please stay on the line and tell me your location";

    #[test]
    fn echo_of_last_spoken_text_is_dropped() {
        let d = EchoDiscriminator::default();
        let utt = final_utt("stay on the line tell me location", 0.9);
        assert!(d.match_ratio(&utt.text, LAST) > 0.5);
        assert_eq!(d.classify(&utt, Some(LAST), false), Classification::Echo);
        assert_eq!(d.classify(&utt, Some(LAST), true), Classification::Echo);
    }

    #[test]
    fn no_qualifying_tokens_means_zero_ratio() {
        let d = EchoDiscriminator::default();
        assert_eq!(d.match_ratio("on the a", LAST), 0.0);
        assert_eq!(
            d.classify(&final_utt("yes sir", 0.9), Some(LAST), false),
            Classification::GenuineInput
        );
    }

    #[test]
    fn half_overlap_is_not_echo() {
        let d = EchoDiscriminator::default();
        // "location" matches, "burning" does not: ratio is exactly 0.5
        let utt = final_utt("location burning", 0.9);
        assert!((d.match_ratio(&utt.text, LAST) - 0.5).abs() < 1e-6);
        assert_eq!(d.classify(&utt, Some(LAST), false), Classification::GenuineInput);
    }

    #[test]
    fn nothing_spoken_disables_echo_check() {
        let d = EchoDiscriminator::default();
        let utt = final_utt("stay on the line tell me location", 0.9);
        assert_eq!(d.classify(&utt, None, false), Classification::GenuineInput);
        assert_eq!(d.classify(&utt, Some("  "), false), Classification::GenuineInput);
    }

    #[test]
    fn barge_in_thresholds() {
        let d = EchoDiscriminator::default();
        // 9 characters, confident: not enough
        assert_eq!(
            d.classify(&interim_utt("help help", 0.9), Some(LAST), true),
            Classification::BargeInCandidate
        );
        // 10+ characters at 0.8: interrupts
        assert_eq!(
            d.classify(&interim_utt("my kitchen is", 0.8), Some(LAST), true),
            Classification::BargeIn
        );
        // long enough but not confident
        assert_eq!(
            d.classify(&interim_utt("my kitchen is", 0.75), Some(LAST), true),
            Classification::BargeInCandidate
        );
        // finals need only 5 characters
        assert_eq!(
            d.classify(&final_utt("smoke", 0.8), Some(LAST), true),
            Classification::BargeIn
        );
        assert_eq!(
            d.classify(&final_utt("fire", 0.95), Some(LAST), true),
            Classification::BargeInCandidate
        );
    }

    #[test]
    fn end_call_phrases_short_circuit() {
        let d = EchoDiscriminator::default();
        assert_eq!(
            d.classify(&final_utt("thanks", 0.9), None, false),
            Classification::EndCallCommand
        );
        assert_eq!(
            d.classify(&interim_utt("okay thanks", 0.3), Some(LAST), true),
            Classification::EndCallCommand
        );
        assert!(is_end_call_command("Thank you."));
        assert!(is_end_call_command("alright bye"));
        assert!(is_end_call_command("stop it right now"));
        assert!(!is_end_call_command("nonstop bleeding"));
        assert!(!is_end_call_command("he is standing by the bus stop sign"));
    }

    #[test]
    fn echoed_end_phrase_is_echo_not_command() {
        let d = EchoDiscriminator::default();
        let spoken = "thank you for calling, help is on the way";
        assert_eq!(
            d.classify(&final_utt("thank you", 0.9), Some(spoken), false),
            Classification::Echo
        );
    }

    #[test]
    fn interim_when_idle_is_display_only() {
        let d = EchoDiscriminator::default();
        assert_eq!(
            d.classify(&interim_utt("there is a", 0.6), None, false),
            Classification::Interim
        );
        assert_eq!(
            d.classify(&interim_utt("   ", 0.6), None, false),
            Classification::Empty
        );
    }
}
