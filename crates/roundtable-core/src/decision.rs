use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Outcome of asking one participant whether it wants to contribute this turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeakerDecision {
    pub participant: ParticipantId,
    pub should_speak: bool,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub forced: bool,
}

impl SpeakerDecision {
    /// Decision for an @mentioned participant. Speaks regardless of confidence.
    pub fn forced(participant: ParticipantId) -> Self {
        Self {
            participant,
            should_speak: true,
            confidence: 1.0,
            reason: "directly mentioned".into(),
            forced: true,
        }
    }

    pub fn speak(participant: ParticipantId, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            participant,
            should_speak: true,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            forced: false,
        }
    }

    pub fn silent(participant: ParticipantId, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            participant,
            should_speak: false,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            forced: false,
        }
    }

    /// A decision recorded for a participant whose evaluation failed.
    pub fn errored(participant: ParticipantId, reason: impl Into<String>) -> Self {
        Self::silent(participant, 0.0, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_speaks_at_full_confidence() {
        let d = SpeakerDecision::forced(ParticipantId::new("claude"));
        assert!(d.should_speak);
        assert!(d.forced);
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn confidence_is_clamped() {
        let d = SpeakerDecision::speak(ParticipantId::new("gpt"), 1.7, "sure");
        assert_eq!(d.confidence, 1.0);
        let d = SpeakerDecision::silent(ParticipantId::new("gpt"), -0.2, "no");
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn errored_is_silent_zero_confidence() {
        let d = SpeakerDecision::errored(ParticipantId::new("grok"), "timeout");
        assert!(!d.should_speak);
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.reason, "timeout");
    }

    #[test]
    fn serde_roundtrip() {
        let d = SpeakerDecision::speak(ParticipantId::new("gemini"), 0.8, "new angle");
        let json = serde_json::to_string(&d).unwrap();
        let parsed: SpeakerDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(d, parsed);
    }
}
