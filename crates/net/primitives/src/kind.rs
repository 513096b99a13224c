use serde::{Deserialize, Serialize};

/// Transport a raw or established connection runs on.
///
/// The reliable transport is stream-oriented with guaranteed ordered delivery.
/// The best-effort transport is cheaper to set up but its connect signal is
/// unreliable under loss, so dial racing favours the reliable transport.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Reliable,
    BestEffort,
}

impl TransportKind {
    pub fn is_reliable(&self) -> bool {
        matches!(self, TransportKind::Reliable)
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, TransportKind::BestEffort)
    }
}
