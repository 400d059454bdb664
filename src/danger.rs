//! Danger tiers.
//!
//! Every class label maps to exactly one `DangerTier`. The table is loaded
//! once at startup and never changes afterwards; labels it does not know
//! resolve to `Low`.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ordered severity bucket. `Critical > High > Medium > Low`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DangerTier {
    Low,
    Medium,
    High,
    Critical,
}

impl DangerTier {
    pub const ALL: [DangerTier; 4] = [
        DangerTier::Critical,
        DangerTier::High,
        DangerTier::Medium,
        DangerTier::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(anyhow!("unknown danger tier '{}'", other)),
        }
    }

    /// RGB display color used when the configuration does not set one.
    pub fn default_color(&self) -> [u8; 3] {
        match self {
            Self::Critical => [255, 0, 255],
            Self::High => [255, 0, 0],
            Self::Medium => [255, 165, 0],
            Self::Low => [0, 255, 0],
        }
    }
}

impl fmt::Display for DangerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tier's configuration row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierEntry {
    pub tier: DangerTier,
    pub labels: Vec<String>,
    pub color: [u8; 3],
}

/// Immutable label → tier mapping plus per-tier colors.
#[derive(Clone, Debug)]
pub struct TierTable {
    by_label: HashMap<String, DangerTier>,
    colors: HashMap<DangerTier, [u8; 3]>,
}

impl TierTable {
    /// Build a table. A label listed under two tiers is a configuration error.
    pub fn new(entries: Vec<TierEntry>) -> Result<Self> {
        let mut by_label = HashMap::new();
        let mut colors: HashMap<DangerTier, [u8; 3]> = DangerTier::ALL
            .iter()
            .map(|tier| (*tier, tier.default_color()))
            .collect();

        for entry in entries {
            colors.insert(entry.tier, entry.color);
            for label in entry.labels {
                let label = label.trim().to_string();
                if label.is_empty() {
                    return Err(anyhow!("tier {} lists an empty class label", entry.tier));
                }
                if let Some(existing) = by_label.insert(label.clone(), entry.tier) {
                    if existing != entry.tier {
                        return Err(anyhow!(
                            "class label '{}' mapped to both {} and {}",
                            label,
                            existing,
                            entry.tier
                        ));
                    }
                }
            }
        }

        Ok(Self { by_label, colors })
    }

    /// Tier of a class label. Unknown labels are `Low`.
    pub fn classify(&self, class_label: &str) -> DangerTier {
        self.by_label
            .get(class_label)
            .copied()
            .unwrap_or(DangerTier::Low)
    }

    /// Highest tier among the labels, `None` when there are none.
    pub fn highest_tier<'a, I>(&self, class_labels: I) -> Option<DangerTier>
    where
        I: IntoIterator<Item = &'a str>,
    {
        class_labels
            .into_iter()
            .map(|label| self.classify(label))
            .max()
    }

    pub fn color(&self, tier: DangerTier) -> [u8; 3] {
        self.colors
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_color())
    }

    pub fn color_for_label(&self, class_label: &str) -> [u8; 3] {
        self.color(self.classify(class_label))
    }

    /// Every configured label, sorted.
    pub fn all_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.by_label.keys().cloned().collect();
        labels.sort_unstable();
        labels
    }
}

/// The DidRay weapon and tool taxonomy.
pub fn default_entries() -> Vec<TierEntry> {
    let entry = |tier: DangerTier, labels: &[&str]| TierEntry {
        tier,
        labels: labels.iter().map(|l| l.to_string()).collect(),
        color: tier.default_color(),
    };
    vec![
        entry(DangerTier::Critical, &["Gun"]),
        entry(DangerTier::High, &["Folding_Knife", "Straight_Knife"]),
        entry(DangerTier::Medium, &["Multi-tool_Knife", "Utility_Knife"]),
        entry(DangerTier::Low, &["Pliers", "Scissor", "Wrench"]),
    ]
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(default_entries()).unwrap_or_else(|e| {
            log::error!("danger: built-in taxonomy rejected: {:#}", e);
            Self {
                by_label: HashMap::new(),
                colors: HashMap::new(),
            }
        })
    }
}
