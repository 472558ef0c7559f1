//! Strategy fingerprinting — a stable identifier for one parameter combination.
//!
//! The identifier keys structured ledger records, so it must not change across
//! builds or platforms: BLAKE3 over a canonical (sorted-key) JSON rendering.

use crate::domain::StrategyParams;
use crate::signals::EntryRule;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hex digest identifying (profit target, stop loss, dca threshold, entry rule).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(pub String);

impl StrategyId {
    pub fn of(params: &StrategyParams, rule: &EntryRule) -> Self {
        use serde_json::json;

        // serde_json's default map is a BTreeMap, so key order is canonical.
        let canonical = json!({
            "profit_target": params.profit_target(),
            "stop_loss": params.stop_loss(),
            "dca_threshold": params.dca_threshold(),
            "rule": rule,
        });
        Self(blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_RULE_LABEL;

    fn params(dca: Option<f64>) -> StrategyParams {
        StrategyParams::new(0.1, 0.05, dca, DEFAULT_RULE_LABEL).unwrap()
    }

    #[test]
    fn id_is_deterministic() {
        let rule = EntryRule::default();
        assert_eq!(StrategyId::of(&params(None), &rule), StrategyId::of(&params(None), &rule));
        assert_eq!(StrategyId::of(&params(None), &rule).as_str().len(), 64);
    }

    #[test]
    fn id_depends_on_every_component() {
        let rule = EntryRule::default();
        let base = StrategyId::of(&params(None), &rule);
        assert_ne!(base, StrategyId::of(&params(Some(0.05)), &rule));
        assert_ne!(base, StrategyId::of(&params(None), &EntryRule::CandleBullish));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = StrategyId("abc".into());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.short(), "abc");
    }
}
