//! SteamCMD output vocabulary
//!
//! Classification is table driven: each rule pairs a regex with the kind of
//! marker it produces, and rules are tried in order. Updating the grammar for
//! a new SteamCMD release means editing `STEAMCMD_RULES`, nothing else.

use crate::types::{ByteProgress, InputPrompt, Phase};
use regex::{Regex, RegexBuilder};

/// Meaning of one recognized output line
#[derive(Clone, Debug, PartialEq)]
pub enum Marker {
    /// Tool self-update chatter (`[ 45%] Downloading update`); status only
    Bootstrap,
    /// Login started
    LoggingIn,
    /// Login completed
    LoggedIn,
    /// Tool waits for input on stdin
    Prompt(InputPrompt),
    /// Content progress
    Progress {
        /// Percent of the current stage
        percent: f64,
        /// Stage the percentage belongs to
        phase: Phase,
        /// Byte counters, when printed
        bytes: Option<ByteProgress>,
    },
    /// Explicit success message
    Success,
    /// Explicit failure message
    Failure,
}

/// Classifies tool output
///
/// Implementations must be pure: the same line always yields the same marker.
pub trait OutputGrammar: Send + Sync {
    /// Classify one complete line (without its terminator)
    fn classify(&self, line: &str) -> Option<Marker>;

    /// Detect an input prompt in an unterminated fragment
    fn detect_prompt(&self, fragment: &str) -> Option<InputPrompt>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RuleKind {
    Failure,
    Success,
    Prompt(InputPrompt),
    LoggedIn,
    LoggingIn,
    Bootstrap,
    UpdateState,
    Percent,
}

/// Ordered rules; the first match wins.
const STEAMCMD_RULES: &[(RuleKind, &str)] = &[
    (RuleKind::Failure, r"(?i)login failure"),
    (RuleKind::Failure, r"\bFAILED\b"),
    (RuleKind::Failure, r"\bERROR\b"),
    (RuleKind::Failure, r"(?i)\berror!"),
    (RuleKind::Failure, r"(?i)invalid app ?id"),
    (RuleKind::Failure, r"(?i)no subscription"),
    (RuleKind::Failure, r"(?i)invalid password"),
    (RuleKind::Failure, r"(?i)rate limit exceeded"),
    (RuleKind::Success, r"^\s*Success\b"),
    (
        RuleKind::Prompt(InputPrompt::GuardCode),
        r"(?i)(steam guard code|two[- ]factor code)\s*:\s*$",
    ),
    (RuleKind::Prompt(InputPrompt::Password), r"(?i)^\s*password\s*:\s*$"),
    (RuleKind::LoggedIn, r"(?i)(waiting for user info|logged in)\.*\s*ok\b"),
    (
        RuleKind::LoggingIn,
        r"(?i)^\s*(logging in user|connecting anonymously)",
    ),
    (RuleKind::Bootstrap, r"^\s*\[\s*(\d{1,3}%|-+)\]"),
    (
        RuleKind::UpdateState,
        r"(?i)update state \(0x[0-9a-f]+\)\s*([a-z ]+?)\s*,\s*progress:\s*(\d+(?:\.\d+)?)(?:\s*\((\d+)\s*/\s*(\d+)\))?",
    ),
    (RuleKind::Percent, r"(\d{1,3}(?:\.\d+)?)\s*%"),
];

struct Rule {
    kind: RuleKind,
    pattern: Regex,
}

/// Grammar for SteamCMD's console output
pub struct SteamCmdGrammar {
    rules: Vec<Rule>,
}

impl std::fmt::Debug for SteamCmdGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteamCmdGrammar")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Default for SteamCmdGrammar {
    fn default() -> Self {
        Self::new()
    }
}

impl SteamCmdGrammar {
    /// Compile the built-in rule table
    pub fn new() -> Self {
        let rules = STEAMCMD_RULES
            .iter()
            .filter_map(|(kind, pattern)| {
                RegexBuilder::new(pattern)
                    .size_limit(1024 * 1024)
                    .build()
                    .map_err(|e| {
                        tracing::warn!(pattern, error = %e, "Invalid output grammar pattern");
                    })
                    .ok()
                    .map(|pattern| Rule {
                        kind: *kind,
                        pattern,
                    })
            })
            .collect();
        Self { rules }
    }

    fn marker_for(&self, rule: &Rule, line: &str) -> Option<Marker> {
        match rule.kind {
            RuleKind::Failure => Some(Marker::Failure),
            RuleKind::Success => Some(Marker::Success),
            RuleKind::Prompt(prompt) => Some(Marker::Prompt(prompt)),
            RuleKind::LoggedIn => Some(Marker::LoggedIn),
            RuleKind::LoggingIn => Some(Marker::LoggingIn),
            RuleKind::Bootstrap => Some(Marker::Bootstrap),
            RuleKind::UpdateState => {
                let caps = rule.pattern.captures(line)?;
                let label = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let percent = parse_percent(caps.get(2)?.as_str())?;
                let bytes = match (caps.get(3), caps.get(4)) {
                    (Some(done), Some(total)) => Some(ByteProgress {
                        done: done.as_str().parse().ok()?,
                        total: total.as_str().parse().ok()?,
                    }),
                    _ => None,
                };
                Some(Marker::Progress {
                    percent,
                    phase: stage_phase(label),
                    bytes,
                })
            }
            RuleKind::Percent => {
                let caps = rule.pattern.captures(line)?;
                let percent = parse_percent(caps.get(1)?.as_str())?;
                Some(Marker::Progress {
                    percent,
                    phase: Phase::Downloading,
                    bytes: None,
                })
            }
        }
    }
}

impl OutputGrammar for SteamCmdGrammar {
    fn classify(&self, line: &str) -> Option<Marker> {
        self.rules
            .iter()
            .filter(|rule| rule.pattern.is_match(line))
            .find_map(|rule| self.marker_for(rule, line))
    }

    fn detect_prompt(&self, fragment: &str) -> Option<InputPrompt> {
        self.rules.iter().find_map(|rule| match rule.kind {
            RuleKind::Prompt(prompt) if rule.pattern.is_match(fragment) => Some(prompt),
            _ => None,
        })
    }
}

fn parse_percent(text: &str) -> Option<f64> {
    let value: f64 = text.parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}

fn stage_phase(label: &str) -> Phase {
    if label.to_ascii_lowercase().contains("verif") {
        Phase::Verifying
    } else {
        Phase::Downloading
    }
}
