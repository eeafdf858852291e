use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Occupancy band for the session's token window.
///
/// Ordered: `Nominal < Caution < Warning < Critical < Exhausted`. Within a
/// session the level only moves upward; `Exhausted` is terminal.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLevel {
    #[default]
    Nominal,
    Caution,
    Warning,
    Critical,
    Exhausted,
}

impl ThresholdLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nominal => "nominal",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for ThresholdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named event that may cause a resume log to be generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    ManualPause,
    ThresholdCrossed(ThresholdLevel),
    MaxTokens,
    ModelContextExceeded,
    SessionEnd,
}

impl TriggerKind {
    /// Wire/config name for this trigger kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualPause => "manual_pause",
            Self::ThresholdCrossed(ThresholdLevel::Nominal) => "threshold_nominal",
            Self::ThresholdCrossed(ThresholdLevel::Caution) => "threshold_caution",
            Self::ThresholdCrossed(ThresholdLevel::Warning) => "threshold_warning",
            Self::ThresholdCrossed(ThresholdLevel::Critical) => "threshold_critical",
            Self::ThresholdCrossed(ThresholdLevel::Exhausted) => "threshold_exhausted",
            Self::MaxTokens => "max_tokens",
            Self::ModelContextExceeded => "model_context_window_exceeded",
            Self::SessionEnd => "session_end",
        }
    }

    /// Trigger kinds that may appear in the `resume_logs.triggers` config set.
    pub const CONFIGURABLE: [TriggerKind; 5] = [
        TriggerKind::ManualPause,
        TriggerKind::ThresholdCrossed(ThresholdLevel::Warning),
        TriggerKind::ThresholdCrossed(ThresholdLevel::Critical),
        TriggerKind::MaxTokens,
        TriggerKind::ModelContextExceeded,
    ];

    /// Parse a configured trigger name. Only the five configurable kinds are
    /// accepted here; anything else is an unknown trigger kind.
    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::CONFIGURABLE
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual_pause" => Ok(Self::ManualPause),
            "threshold_nominal" => Ok(Self::ThresholdCrossed(ThresholdLevel::Nominal)),
            "threshold_caution" => Ok(Self::ThresholdCrossed(ThresholdLevel::Caution)),
            "threshold_warning" => Ok(Self::ThresholdCrossed(ThresholdLevel::Warning)),
            "threshold_critical" => Ok(Self::ThresholdCrossed(ThresholdLevel::Critical)),
            "threshold_exhausted" => Ok(Self::ThresholdCrossed(ThresholdLevel::Exhausted)),
            "max_tokens" => Ok(Self::MaxTokens),
            "model_context_window_exceeded" => Ok(Self::ModelContextExceeded),
            "session_end" => Ok(Self::SessionEnd),
            other => Err(format!("unknown trigger kind '{other}'")),
        }
    }
}

/// A trigger observation handed to the dispatcher.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub occupancy_at_fire: f64,
}

impl TriggerEvent {
    pub fn new(kind: TriggerKind, session_id: impl Into<String>, occupancy: f64) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            session_id: session_id.into(),
            occupancy_at_fire: occupancy,
        }
    }
}

/// Resume log section names. The closed set and its order are part of the
/// file-format contract; no runtime registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionName {
    ContextMetrics,
    MissionSummary,
    Accomplishments,
    KeyFindings,
    Decisions,
    NextSteps,
    CriticalContext,
}

impl SectionName {
    /// All sections in persisted order.
    pub const ALL: [SectionName; 7] = [
        SectionName::ContextMetrics,
        SectionName::MissionSummary,
        SectionName::Accomplishments,
        SectionName::KeyFindings,
        SectionName::Decisions,
        SectionName::NextSteps,
        SectionName::CriticalContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContextMetrics => "ContextMetrics",
            Self::MissionSummary => "MissionSummary",
            Self::Accomplishments => "Accomplishments",
            Self::KeyFindings => "KeyFindings",
            Self::Decisions => "Decisions",
            Self::NextSteps => "NextSteps",
            Self::CriticalContext => "CriticalContext",
        }
    }

    /// Default token allocation for this section.
    pub fn default_budget(&self) -> u32 {
        match self {
            Self::ContextMetrics => 500,
            Self::MissionSummary => 1_000,
            Self::Accomplishments => 2_000,
            Self::KeyFindings => 2_500,
            Self::Decisions => 1_500,
            Self::NextSteps => 1_500,
            Self::CriticalContext => 1_000,
        }
    }
}

impl std::fmt::Display for SectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SectionName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown section name '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_threshold_level_ordering() {
        assert!(ThresholdLevel::Nominal < ThresholdLevel::Caution);
        assert!(ThresholdLevel::Caution < ThresholdLevel::Warning);
        assert!(ThresholdLevel::Warning < ThresholdLevel::Critical);
        assert!(ThresholdLevel::Critical < ThresholdLevel::Exhausted);
    }

    #[test]
    fn test_threshold_level_default_is_nominal() {
        assert_eq!(ThresholdLevel::default(), ThresholdLevel::Nominal);
    }

    #[test]
    fn test_threshold_level_display() {
        assert_eq!(ThresholdLevel::Nominal.to_string(), "nominal");
        assert_eq!(ThresholdLevel::Exhausted.to_string(), "exhausted");
    }

    #[test]
    fn test_trigger_kind_display_fromstr_roundtrip() {
        let kinds = [
            TriggerKind::ManualPause,
            TriggerKind::ThresholdCrossed(ThresholdLevel::Caution),
            TriggerKind::ThresholdCrossed(ThresholdLevel::Warning),
            TriggerKind::ThresholdCrossed(ThresholdLevel::Critical),
            TriggerKind::MaxTokens,
            TriggerKind::ModelContextExceeded,
            TriggerKind::SessionEnd,
        ];
        for kind in kinds {
            let parsed = TriggerKind::from_str(kind.as_str()).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_trigger_kind_from_str_unknown() {
        let err = TriggerKind::from_str("explosion").unwrap_err();
        assert!(err.contains("unknown trigger kind 'explosion'"));
    }

    #[test]
    fn test_configurable_trigger_names() {
        let names: Vec<&str> = TriggerKind::CONFIGURABLE
            .iter()
            .map(|k| k.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "manual_pause",
                "threshold_warning",
                "threshold_critical",
                "max_tokens",
                "model_context_window_exceeded",
            ]
        );
    }

    #[test]
    fn test_from_config_name_rejects_non_configurable() {
        assert!(TriggerKind::from_config_name("manual_pause").is_some());
        assert!(TriggerKind::from_config_name("threshold_caution").is_none());
        assert!(TriggerKind::from_config_name("session_end").is_none());
        assert!(TriggerKind::from_config_name("bogus").is_none());
    }

    #[test]
    fn test_section_order_is_fixed() {
        let names: Vec<&str> = SectionName::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ContextMetrics",
                "MissionSummary",
                "Accomplishments",
                "KeyFindings",
                "Decisions",
                "NextSteps",
                "CriticalContext",
            ]
        );
    }

    #[test]
    fn test_section_default_budgets_sum_to_total_default() {
        let sum: u32 = SectionName::ALL.iter().map(|s| s.default_budget()).sum();
        assert_eq!(sum, 10_000);
    }

    #[test]
    fn test_section_name_fromstr() {
        assert_eq!(
            SectionName::from_str("KeyFindings").unwrap(),
            SectionName::KeyFindings
        );
        assert!(SectionName::from_str("keyfindings").is_err());
        assert!(SectionName::from_str("").is_err());
    }

    #[test]
    fn test_trigger_event_carries_occupancy() {
        let event = TriggerEvent::new(TriggerKind::ManualPause, "01ARZ", 0.42);
        assert_eq!(event.kind, TriggerKind::ManualPause);
        assert_eq!(event.session_id, "01ARZ");
        assert!((event.occupancy_at_fire - 0.42).abs() < f64::EPSILON);
    }
}
