//! Message kinds, harmony categories and access tiers
//!
//! Impact weights are fixed per kind. Nothing a caller sends can change how
//! hard a message pushes on the field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel `to_node` value addressing every node.
pub const BROADCAST_NODE: &str = "collective";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Gratitude,
    Healing,
    Integration,
    Emergence,
    Boundary,
    Celebration,
    Transmission,
    Invocation,
    Blessing,
    Inquiry,
    Reflection,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Gratitude,
        MessageKind::Healing,
        MessageKind::Integration,
        MessageKind::Emergence,
        MessageKind::Boundary,
        MessageKind::Celebration,
        MessageKind::Transmission,
        MessageKind::Invocation,
        MessageKind::Blessing,
        MessageKind::Inquiry,
        MessageKind::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Gratitude => "gratitude",
            MessageKind::Healing => "healing",
            MessageKind::Integration => "integration",
            MessageKind::Emergence => "emergence",
            MessageKind::Boundary => "boundary",
            MessageKind::Celebration => "celebration",
            MessageKind::Transmission => "transmission",
            MessageKind::Invocation => "invocation",
            MessageKind::Blessing => "blessing",
            MessageKind::Inquiry => "inquiry",
            MessageKind::Reflection => "reflection",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or(())
    }
}

/// The seven harmonies every message is bucketed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarmonyCategory {
    Transparency,
    Coherence,
    Resonance,
    Agency,
    Vitality,
    Mutuality,
    Novelty,
}

impl HarmonyCategory {
    pub const ALL: [HarmonyCategory; 7] = [
        HarmonyCategory::Transparency,
        HarmonyCategory::Coherence,
        HarmonyCategory::Resonance,
        HarmonyCategory::Agency,
        HarmonyCategory::Vitality,
        HarmonyCategory::Mutuality,
        HarmonyCategory::Novelty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HarmonyCategory::Transparency => "transparency",
            HarmonyCategory::Coherence => "coherence",
            HarmonyCategory::Resonance => "resonance",
            HarmonyCategory::Agency => "agency",
            HarmonyCategory::Vitality => "vitality",
            HarmonyCategory::Mutuality => "mutuality",
            HarmonyCategory::Novelty => "novelty",
        }
    }
}

impl fmt::Display for HarmonyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HarmonyCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HarmonyCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

/// Caller access tiers, ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessTier {
    Open,
    Elevated,
    Privileged,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Open => "open",
            AccessTier::Elevated => "elevated",
            AccessTier::Privileged => "privileged",
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breathing phase a kind resonates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResonanceClass {
    Inhale,
    Exhale,
    Pause,
    FullCycle,
}

/// Catalog entry for one message kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindSpec {
    pub kind: MessageKind,
    /// Field impact on a 0-100 scale.
    pub impact_weight: u8,
    pub resonance: ResonanceClass,
    pub min_tier: AccessTier,
    /// Harmonies this kind naturally strengthens.
    pub affinities: [HarmonyCategory; 2],
    pub description: &'static str,
}

const CATALOG: [KindSpec; 11] = {
    use AccessTier::*;
    use HarmonyCategory::*;
    use ResonanceClass::*;
    [
        KindSpec {
            kind: MessageKind::Gratitude,
            impact_weight: 7,
            resonance: Exhale,
            min_tier: Open,
            affinities: [Mutuality, Vitality],
            description: "Appreciation that increases field coherence",
        },
        KindSpec {
            kind: MessageKind::Healing,
            impact_weight: 6,
            resonance: FullCycle,
            min_tier: Open,
            affinities: [Mutuality, Coherence],
            description: "Restoring balance and coherence",
        },
        KindSpec {
            kind: MessageKind::Integration,
            impact_weight: 5,
            resonance: Pause,
            min_tier: Open,
            affinities: [Coherence, Mutuality],
            description: "Weaving parts into wholeness",
        },
        KindSpec {
            kind: MessageKind::Emergence,
            impact_weight: 3,
            resonance: Inhale,
            min_tier: Open,
            affinities: [Novelty, Vitality],
            description: "New patterns arising from the field",
        },
        KindSpec {
            kind: MessageKind::Boundary,
            impact_weight: 2,
            resonance: Pause,
            min_tier: Open,
            affinities: [Agency, Transparency],
            description: "Clear definition of shared space",
        },
        KindSpec {
            kind: MessageKind::Celebration,
            impact_weight: 4,
            resonance: Exhale,
            min_tier: Open,
            affinities: [Vitality, Resonance],
            description: "Honoring completion and achievement",
        },
        KindSpec {
            kind: MessageKind::Transmission,
            impact_weight: 4,
            resonance: Exhale,
            min_tier: Elevated,
            affinities: [Agency, Resonance],
            description: "Knowledge or energy transfer",
        },
        KindSpec {
            kind: MessageKind::Invocation,
            impact_weight: 6,
            resonance: Inhale,
            min_tier: Elevated,
            affinities: [Agency, Novelty],
            description: "Calling forth a presence or quality",
        },
        KindSpec {
            kind: MessageKind::Blessing,
            impact_weight: 8,
            resonance: FullCycle,
            min_tier: Privileged,
            affinities: [Mutuality, Resonance],
            description: "Affirmation extended to the whole field",
        },
        KindSpec {
            kind: MessageKind::Inquiry,
            impact_weight: 2,
            resonance: Inhale,
            min_tier: Open,
            affinities: [Transparency, Novelty],
            description: "Questions that open new possibilities",
        },
        KindSpec {
            kind: MessageKind::Reflection,
            impact_weight: 1,
            resonance: Pause,
            min_tier: Open,
            affinities: [Transparency, Coherence],
            description: "Conscious observation of patterns",
        },
    ]
};

/// Static registry of message kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCatalog;

impl MessageCatalog {
    pub fn spec(&self, kind: MessageKind) -> &'static KindSpec {
        // CATALOG is ordered like MessageKind::ALL
        &CATALOG[kind as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<&'static KindSpec> {
        name.parse::<MessageKind>().ok().map(|k| self.spec(k))
    }

    pub fn impact_weight(&self, kind: MessageKind) -> u8 {
        self.spec(kind).impact_weight
    }

    pub fn min_tier(&self, kind: MessageKind) -> AccessTier {
        self.spec(kind).min_tier
    }

    pub fn entries(&self) -> &'static [KindSpec] {
        &CATALOG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_matches_kinds() {
        let catalog = MessageCatalog;
        for kind in MessageKind::ALL {
            assert_eq!(catalog.spec(kind).kind, kind);
        }
    }

    #[test]
    fn test_fixed_impact_weights() {
        let catalog = MessageCatalog;
        let expected = [
            ("gratitude", 7),
            ("healing", 6),
            ("integration", 5),
            ("emergence", 3),
            ("boundary", 2),
            ("celebration", 4),
            ("transmission", 4),
            ("invocation", 6),
            ("blessing", 8),
        ];
        for (name, weight) in expected {
            let spec = catalog.lookup(name).expect(name);
            assert_eq!(spec.impact_weight, weight, "{name}");
        }
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(AccessTier::Open < AccessTier::Elevated);
        assert!(AccessTier::Elevated < AccessTier::Privileged);
        assert_eq!(MessageCatalog.min_tier(MessageKind::Blessing), AccessTier::Privileged);
        assert_eq!(MessageCatalog.min_tier(MessageKind::Invocation), AccessTier::Elevated);
        assert_eq!(MessageCatalog.min_tier(MessageKind::Gratitude), AccessTier::Open);
    }

    #[test]
    fn test_exactly_seven_categories() {
        assert_eq!(HarmonyCategory::ALL.len(), 7);
        assert_eq!("mutuality".parse::<HarmonyCategory>(), Ok(HarmonyCategory::Mutuality));
        assert!("wholeness".parse::<HarmonyCategory>().is_err());
        assert!("Mutuality".parse::<HarmonyCategory>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&MessageKind::Gratitude).unwrap();
        assert_eq!(json, "\"gratitude\"");
        let class: ResonanceClass = serde_json::from_str("\"full-cycle\"").unwrap();
        assert_eq!(class, ResonanceClass::FullCycle);
    }
}
