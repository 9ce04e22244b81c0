use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 5,
            Severity::Medium => 15,
            Severity::High => 25,
            Severity::Critical => 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceRule {
    BlockedCountry,
    HighRiskCountry,
    RapidCashOut,
    Velocity,
    NewBeneficiarySurge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlag {
    pub rule: ComplianceRule,
    pub message: String,
    pub severity: Severity,
}

/// Aggregate screening outcome. Stored verbatim on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub hold: bool,
    pub flags: Vec<ComplianceFlag>,
    /// Highest severity among the flags; `None` when nothing fired.
    pub severity: Option<Severity>,
    pub risk_score: u32,
    pub review_required: bool,
}

impl ComplianceResult {
    pub fn from_flags(flags: Vec<ComplianceFlag>) -> Self {
        let risk_score = flags.iter().map(|f| f.severity.weight()).sum();
        let severity = flags.iter().map(|f| f.severity).max();
        let hold = !flags.is_empty();
        Self {
            hold,
            severity,
            risk_score,
            review_required: hold || risk_score > 50,
            flags,
        }
    }

    pub fn clear() -> Self {
        Self::from_flags(Vec::new())
    }

    pub fn has_rule(&self, rule: ComplianceRule) -> bool {
        self.flags.iter().any(|f| f.rule == rule)
    }
}
