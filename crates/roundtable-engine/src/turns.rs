//! Serial speaking-order selection.

use serde::{Deserialize, Serialize};

use roundtable_core::decision::SpeakerDecision;
use roundtable_core::ids::ParticipantId;

/// How the first responder is chosen each turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStrategy {
    /// Highest confidence first; mentioned participants lead.
    Confidence,
    /// The first-responder slot rotates through the fixed order each turn.
    Rotate,
    /// A user-configured static order.
    Fixed,
}

impl std::str::FromStr for TurnStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confidence" => Ok(Self::Confidence),
            "rotate" => Ok(Self::Rotate),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("unknown turn strategy: {other}")),
        }
    }
}

/// Orders the speaking set. Holds the per-session rotation index; callers
/// serialize access through the single-turn invariant.
pub struct TurnManager {
    strategy: TurnStrategy,
    fixed_order: Vec<ParticipantId>,
    rotation_index: usize,
}

impl TurnManager {
    pub fn new(strategy: TurnStrategy, fixed_order: Vec<ParticipantId>) -> Self {
        Self {
            strategy,
            fixed_order,
            rotation_index: 0,
        }
    }

    pub fn strategy(&self) -> TurnStrategy {
        self.strategy
    }

    pub fn current_first_responder(&self) -> Option<&ParticipantId> {
        if self.fixed_order.is_empty() {
            return None;
        }
        Some(&self.fixed_order[self.rotation_index % self.fixed_order.len()])
    }

    /// Produce the serial speaking order for this turn's decisions.
    ///
    /// Decisions arrive sorted (forced first, then confidence descending).
    /// Under `rotate` and `fixed`, forced speakers are placed first; under
    /// `confidence` their coerced 1.0 confidence already leads.
    pub fn determine_order(&mut self, decisions: &[SpeakerDecision]) -> Vec<ParticipantId> {
        let speakers: Vec<&SpeakerDecision> =
            decisions.iter().filter(|d| d.should_speak).collect();
        if speakers.is_empty() {
            return Vec::new();
        }

        match self.strategy {
            TurnStrategy::Confidence => speakers.iter().map(|d| d.participant.clone()).collect(),
            TurnStrategy::Rotate => {
                let ordered = self.rotated_order(&speakers);
                self.advance();
                ordered
            }
            TurnStrategy::Fixed => {
                let in_fixed: Vec<ParticipantId> = self
                    .fixed_order
                    .iter()
                    .filter(|p| speakers.iter().any(|d| &d.participant == *p))
                    .cloned()
                    .collect();
                forced_first(in_fixed, &speakers)
            }
        }
    }

    /// Rotated fixed order starting at the current index, filtered to actual
    /// speakers. A silent participant at the index is skipped, promoting the
    /// next speaker in fixed order.
    fn rotated_order(&self, speakers: &[&SpeakerDecision]) -> Vec<ParticipantId> {
        if self.fixed_order.is_empty() {
            return speakers.iter().map(|d| d.participant.clone()).collect();
        }
        let start = self.rotation_index % self.fixed_order.len();
        let rotated: Vec<ParticipantId> = self.fixed_order[start..]
            .iter()
            .chain(&self.fixed_order[..start])
            .filter(|p| speakers.iter().any(|d| &d.participant == *p))
            .cloned()
            .collect();
        forced_first(rotated, speakers)
    }

    fn advance(&mut self) {
        if !self.fixed_order.is_empty() {
            self.rotation_index = (self.rotation_index + 1) % self.fixed_order.len();
        }
    }
}

/// Stable partition with forced speakers ahead of the rest.
fn forced_first(order: Vec<ParticipantId>, speakers: &[&SpeakerDecision]) -> Vec<ParticipantId> {
    let is_forced = |p: &ParticipantId| {
        speakers
            .iter()
            .any(|d| &d.participant == p && d.forced)
    };
    let (forced, rest): (Vec<ParticipantId>, Vec<ParticipantId>) =
        order.into_iter().partition(is_forced);
    forced.into_iter().chain(rest).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(ParticipantId::new).collect()
    }

    fn speak(name: &str, confidence: f64) -> SpeakerDecision {
        SpeakerDecision::speak(ParticipantId::new(name), confidence, "r")
    }

    fn silent(name: &str) -> SpeakerDecision {
        SpeakerDecision::silent(ParticipantId::new(name), 0.1, "r")
    }

    #[test]
    fn confidence_order_follows_decisions() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Confidence,
            ids(&["claude", "gpt", "gemini", "grok"]),
        );
        let decisions = vec![speak("gemini", 0.9), speak("claude", 0.7), silent("gpt")];
        let order = mgr.determine_order(&decisions);
        assert_eq!(order, ids(&["gemini", "claude"]));
    }

    #[test]
    fn rotate_starts_at_index_and_advances() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Rotate,
            ids(&["claude", "gpt", "gemini"]),
        );
        let all_speak = vec![speak("claude", 0.5), speak("gpt", 0.5), speak("gemini", 0.5)];

        assert_eq!(mgr.determine_order(&all_speak), ids(&["claude", "gpt", "gemini"]));
        assert_eq!(mgr.determine_order(&all_speak), ids(&["gpt", "gemini", "claude"]));
        assert_eq!(mgr.determine_order(&all_speak), ids(&["gemini", "claude", "gpt"]));
        // wraps around
        assert_eq!(mgr.determine_order(&all_speak), ids(&["claude", "gpt", "gemini"]));
    }

    #[test]
    fn rotate_skips_silent_first_responder() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Rotate,
            ids(&["claude", "gpt", "gemini"]),
        );
        // claude (index 0) is silent — gpt is promoted to first
        let decisions = vec![speak("gpt", 0.5), speak("gemini", 0.5), silent("claude")];
        assert_eq!(mgr.determine_order(&decisions), ids(&["gpt", "gemini"]));
    }

    #[test]
    fn rotate_places_forced_first() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Rotate,
            ids(&["claude", "gpt", "gemini"]),
        );
        let decisions = vec![
            SpeakerDecision::forced(ParticipantId::new("gemini")),
            speak("claude", 0.9),
            speak("gpt", 0.8),
        ];
        let order = mgr.determine_order(&decisions);
        assert_eq!(order[0], ParticipantId::new("gemini"));
        assert_eq!(order, ids(&["gemini", "claude", "gpt"]));
    }

    #[test]
    fn fixed_uses_configured_order() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Fixed,
            ids(&["grok", "gemini", "gpt", "claude"]),
        );
        let decisions = vec![speak("claude", 0.99), speak("gemini", 0.1)];
        assert_eq!(mgr.determine_order(&decisions), ids(&["gemini", "claude"]));
    }

    #[test]
    fn fixed_places_forced_first() {
        let mut mgr = TurnManager::new(
            TurnStrategy::Fixed,
            ids(&["claude", "gpt", "gemini"]),
        );
        let decisions = vec![
            SpeakerDecision::forced(ParticipantId::new("gemini")),
            speak("claude", 0.5),
        ];
        assert_eq!(mgr.determine_order(&decisions), ids(&["gemini", "claude"]));
    }

    #[test]
    fn empty_speaking_set() {
        let mut mgr = TurnManager::new(TurnStrategy::Rotate, ids(&["claude", "gpt"]));
        let decisions = vec![silent("claude"), silent("gpt")];
        assert!(mgr.determine_order(&decisions).is_empty());
    }

    #[test]
    fn rotation_advances_even_when_set_shrinks() {
        let mut mgr = TurnManager::new(TurnStrategy::Rotate, ids(&["claude", "gpt"]));
        let only_gpt = vec![speak("gpt", 0.5), silent("claude")];
        assert_eq!(mgr.determine_order(&only_gpt), ids(&["gpt"]));
        // index advanced to gpt
        assert_eq!(mgr.current_first_responder(), Some(&ParticipantId::new("gpt")));
    }

    #[test]
    fn strategy_from_str() {
        assert_eq!("rotate".parse::<TurnStrategy>().unwrap(), TurnStrategy::Rotate);
        assert_eq!(
            "confidence".parse::<TurnStrategy>().unwrap(),
            TurnStrategy::Confidence
        );
        assert!("roundrobin".parse::<TurnStrategy>().is_err());
    }
}
