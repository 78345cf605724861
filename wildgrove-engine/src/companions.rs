//! Authored companion content: the collectible roster the lottery draws from.

use serde::{Deserialize, Serialize};

/// Stable identifier for an authored companion.
pub type CompanionId = String;

/// Rarity scale, ordered from most to least common.
///
/// Declaration order is load-bearing: tier math (window weights, cumulative
/// buckets) relies on `Common < Uncommon < Rare < Epic < Legendary`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// All tiers in ascending order.
    pub const ALL: [Self; 5] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
    ];

    /// Zero-based position on the rarity scale.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Common => 0,
            Self::Uncommon => 1,
            Self::Rare => 2,
            Self::Epic => 3,
            Self::Legendary => 4,
        }
    }

    /// Tier at `index`, clamped to the scale edges.
    #[must_use]
    pub const fn from_index_clamped(index: usize) -> Self {
        match index {
            0 => Self::Common,
            1 => Self::Uncommon,
            2 => Self::Rare,
            3 => Self::Epic,
            _ => Self::Legendary,
        }
    }
}

impl std::fmt::Display for Rarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Common => write!(f, "common"),
            Self::Uncommon => write!(f, "uncommon"),
            Self::Rare => write!(f, "rare"),
            Self::Epic => write!(f, "epic"),
            Self::Legendary => write!(f, "legendary"),
        }
    }
}

/// A collectible companion. Authored content, immutable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub id: CompanionId,
    pub name: String,
    /// Strength rating used by the bond-probability curve.
    pub power: u32,
    #[serde(default)]
    pub rarity: Rarity,
    /// Theme tag (grove, marsh, peak, ...).
    #[serde(default)]
    pub biome: String,
}

/// Container for the full authored roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompanionCatalog {
    pub companions: Vec<Companion>,
}

impl CompanionCatalog {
    /// Create an empty catalog (useful for tests).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            companions: Vec::new(),
        }
    }

    /// Load catalog data from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a valid roster.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Create a catalog from pre-parsed companions.
    #[must_use]
    pub fn from_companions(companions: Vec<Companion>) -> Self {
        Self { companions }
    }

    /// Look up a companion by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Companion> {
        self.companions.iter().find(|companion| companion.id == id)
    }

    /// Number of authored companions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.companions.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.companions.is_empty()
    }
}
