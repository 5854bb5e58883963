//! Keyword symptom classifier.
//!
//! Utterances are lowercased and checked against an ordered rule table.
//! The first rule with any trigger present wins; a miss falls back to the
//! generic prompt and leaves severity untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordinal risk tier. Ordering is `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Output of a single classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Symptom tag of the winning rule, `None` on fallback.
    pub tag: Option<&'static str>,
    /// Rule severity. `None` on fallback so the session keeps its tier.
    pub severity: Option<Severity>,
    pub reply_template: &'static str,
    pub referral_eligible: bool,
}

impl Classification {
    pub fn is_match(&self) -> bool {
        self.tag.is_some()
    }
}

struct SymptomRule {
    triggers: &'static [&'static str],
    tag: &'static str,
    severity: Severity,
    reply_template: &'static str,
    referral_eligible: bool,
}

pub const FALLBACK_REPLY: &str =
    "Thank you for sharing that information. Can you tell me more about your symptoms and when they started?";

// ── Rule table (priority order) ─────────────────────────────

static RULES: &[SymptomRule] = &[
    SymptomRule {
        triggers: &["chest pain", "heart"],
        tag: "chest pain",
        severity: Severity::High,
        reply_template: "I notice you mentioned chest pain. This could be concerning. Can you describe the pain and when it started?",
        referral_eligible: true,
    },
    SymptomRule {
        triggers: &["headache", "migraine"],
        tag: "headache",
        severity: Severity::Medium,
        reply_template: "Headaches can have many causes. How long have you been experiencing them, and how severe is the pain?",
        referral_eligible: false,
    },
    SymptomRule {
        triggers: &["rash", "skin"],
        tag: "skin rash",
        severity: Severity::Medium,
        reply_template: "Skin conditions can be difficult to diagnose without visual examination. Can you describe the appearance and location of the rash?",
        referral_eligible: true,
    },
    SymptomRule {
        triggers: &["fever", "temperature"],
        tag: "fever",
        severity: Severity::Medium,
        reply_template: "Fever is often a sign that your body is fighting an infection. How high is your temperature, and do you have any other symptoms?",
        referral_eligible: false,
    },
    SymptomRule {
        triggers: &["cough", "breathing"],
        tag: "cough",
        severity: Severity::Medium,
        reply_template: "Respiratory symptoms can have various causes. Is your cough dry or productive, and are you experiencing any shortness of breath?",
        referral_eligible: false,
    },
];

/// Classify one utterance. Never fails; unmatched input yields the fallback.
pub fn classify(utterance: &str) -> Classification {
    let lower = utterance.to_lowercase();

    for rule in RULES {
        if rule.triggers.iter().any(|kw| lower.contains(kw)) {
            tracing::debug!(tag = rule.tag, severity = ?rule.severity, "Symptom rule matched");
            return Classification {
                tag: Some(rule.tag),
                severity: Some(rule.severity),
                reply_template: rule.reply_template,
                referral_eligible: rule.referral_eligible,
            };
        }
    }

    Classification {
        tag: None,
        severity: None,
        reply_template: FALLBACK_REPLY,
        referral_eligible: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chest_pain_wins_over_later_rules() {
        let c = classify("I have a headache, a rash and CHEST PAIN");
        assert_eq!(c.tag, Some("chest pain"));
        assert_eq!(c.severity, Some(Severity::High));
        assert!(c.referral_eligible);
    }

    #[test]
    fn heart_is_a_chest_pain_trigger() {
        assert_eq!(classify("my heart is racing").tag, Some("chest pain"));
    }

    #[test]
    fn migraine_maps_to_headache() {
        let c = classify("Another Migraine today");
        assert_eq!(c.tag, Some("headache"));
        assert_eq!(c.severity, Some(Severity::Medium));
        assert!(!c.referral_eligible);
    }

    #[test]
    fn skin_maps_to_referral_eligible_rash() {
        let c = classify("something on my skin");
        assert_eq!(c.tag, Some("skin rash"));
        assert!(c.referral_eligible);
    }

    #[test]
    fn fever_and_cough_rules() {
        assert_eq!(classify("high temperature").tag, Some("fever"));
        assert_eq!(classify("trouble breathing at night").tag, Some("cough"));
    }

    #[test]
    fn unmatched_falls_back() {
        let c = classify("I feel tired");
        assert!(!c.is_match());
        assert_eq!(c.severity, None);
        assert_eq!(c.reply_template, FALLBACK_REPLY);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!("high".parse::<Severity>(), Ok(Severity::High));
        assert!("critical".parse::<Severity>().is_err());
    }
}
