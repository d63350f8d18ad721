//! Static registry of the five Trollhätte canal bridges.
//!
//! The canal is modelled as an ordered chain, index 0 southmost. Two bridges
//! open for boat traffic (Klaffbron and Stridsbergsbron), two are ordinary
//! intermediate bridges, and Stallbackabron is the high fixed bridge that
//! never opens. The inter-bridge gap table lives here and nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a bridge in the chain. Closed set; ordering follows the canal
/// south to north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeId {
    Olidebron,
    Klaffbron,
    Jarnvagsbron,
    Stridsbergsbron,
    Stallbackabron,
}

impl BridgeId {
    pub const ALL: [BridgeId; 5] = [
        BridgeId::Olidebron,
        BridgeId::Klaffbron,
        BridgeId::Jarnvagsbron,
        BridgeId::Stridsbergsbron,
        BridgeId::Stallbackabron,
    ];

    /// Stable string id used in flow-card arguments and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeId::Olidebron => "olidebron",
            BridgeId::Klaffbron => "klaffbron",
            BridgeId::Jarnvagsbron => "jarnvagsbron",
            BridgeId::Stridsbergsbron => "stridsbergsbron",
            BridgeId::Stallbackabron => "stallbackabron",
        }
    }

    pub fn from_str_id(s: &str) -> Option<BridgeId> {
        BridgeId::ALL.iter().copied().find(|b| b.as_str() == s)
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a bridge participates in openings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeKind {
    /// One of the two opening bridges a vessel can have as its target.
    Target,
    /// Opens, but is never a target; vessels pass it on the way.
    Intermediate,
    /// The high fixed bridge (Stallbackabron); does not open.
    Special,
}

/// A bridge with its fixed position and chain index.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub id: BridgeId,
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
    pub kind: BridgeKind,
    /// 0 south .. 4 north.
    pub index: usize,
}

/// Adjacent gaps along the canal in metres, south to north.
/// Non-adjacent distances are sums of these legs.
const ADJACENT_GAPS_M: [f64; 4] = [1550.0, 600.0, 650.0, 2150.0];

const BRIDGES: [Bridge; 5] = [
    Bridge {
        id: BridgeId::Olidebron,
        name: "Olidebron",
        lat: 58.2700,
        lon: 12.2690,
        kind: BridgeKind::Intermediate,
        index: 0,
    },
    Bridge {
        id: BridgeId::Klaffbron,
        name: "Klaffbron",
        lat: 58.2832,
        lon: 12.2858,
        kind: BridgeKind::Target,
        index: 1,
    },
    Bridge {
        id: BridgeId::Jarnvagsbron,
        name: "Järnvägsbron",
        lat: 58.2885,
        lon: 12.2866,
        kind: BridgeKind::Intermediate,
        index: 2,
    },
    Bridge {
        id: BridgeId::Stridsbergsbron,
        name: "Stridsbergsbron",
        lat: 58.2936,
        lon: 12.2939,
        kind: BridgeKind::Target,
        index: 3,
    },
    Bridge {
        id: BridgeId::Stallbackabron,
        name: "Stallbackabron",
        lat: 58.3123,
        lon: 12.3079,
        kind: BridgeKind::Special,
        index: 4,
    },
];

/// Immutable lookup surface over the bridge chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeRegistry;

impl BridgeRegistry {
    pub fn new() -> Self {
        BridgeRegistry
    }

    /// All bridges in canal order, index 0 southmost.
    pub fn in_order(&self) -> &'static [Bridge] {
        &BRIDGES
    }

    pub fn get(&self, id: BridgeId) -> &'static Bridge {
        &BRIDGES[id as usize]
    }

    /// The two opening bridges, south first.
    pub fn target_bridges(&self) -> [&'static Bridge; 2] {
        [
            self.get(BridgeId::Klaffbron),
            self.get(BridgeId::Stridsbergsbron),
        ]
    }

    pub fn is_target(&self, id: BridgeId) -> bool {
        self.get(id).kind == BridgeKind::Target
    }

    pub fn is_special(&self, id: BridgeId) -> bool {
        self.get(id).kind == BridgeKind::Special
    }

    /// Distance in metres along the canal between two bridges. Zero for the
    /// same bridge.
    pub fn gap_between(&self, a: BridgeId, b: BridgeId) -> f64 {
        let (lo, hi) = {
            let (ai, bi) = (self.get(a).index, self.get(b).index);
            (ai.min(bi), ai.max(bi))
        };
        ADJACENT_GAPS_M[lo..hi].iter().sum()
    }

    /// The next target bridge after `after` in the given travel direction,
    /// skipping intermediates and the special bridge. `None` when the vessel
    /// has no further opening bridge ahead (journey completion).
    pub fn next_target_after(&self, after: BridgeId, northbound: bool) -> Option<BridgeId> {
        let idx = self.get(after).index;
        let iter: Box<dyn Iterator<Item = &Bridge>> = if northbound {
            Box::new(BRIDGES.iter().filter(move |b| b.index > idx))
        } else {
            Box::new(BRIDGES.iter().rev().filter(move |b| b.index < idx))
        };
        iter.filter(|b| b.kind == BridgeKind::Target)
            .map(|b| b.id)
            .next()
    }

    /// True if `a` is north of `b` in the chain.
    pub fn is_north_of(&self, a: BridgeId, b: BridgeId) -> bool {
        self.get(a).index > self.get(b).index
    }

    /// Expected passage sequence for a full northbound transit.
    pub fn northbound_sequence(&self) -> Vec<BridgeId> {
        BRIDGES.iter().map(|b| b.id).collect()
    }

    /// Expected passage sequence for a full southbound transit.
    pub fn southbound_sequence(&self) -> Vec<BridgeId> {
        BRIDGES.iter().rev().map(|b| b.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order_is_south_to_north() {
        let reg = BridgeRegistry::new();
        let bridges = reg.in_order();
        for pair in bridges.windows(2) {
            assert!(
                pair[1].lat > pair[0].lat,
                "{} should be north of {}",
                pair[1].name,
                pair[0].name
            );
            assert_eq!(pair[1].index, pair[0].index + 1);
        }
    }

    #[test]
    fn test_exactly_two_target_bridges() {
        let reg = BridgeRegistry::new();
        let targets: Vec<_> = reg
            .in_order()
            .iter()
            .filter(|b| b.kind == BridgeKind::Target)
            .collect();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, BridgeId::Klaffbron);
        assert_eq!(targets[1].id, BridgeId::Stridsbergsbron);
    }

    #[test]
    fn test_gap_table_sums_legs() {
        let reg = BridgeRegistry::new();
        assert_eq!(reg.gap_between(BridgeId::Klaffbron, BridgeId::Jarnvagsbron), 600.0);
        assert_eq!(
            reg.gap_between(BridgeId::Klaffbron, BridgeId::Stridsbergsbron),
            600.0 + 650.0
        );
        assert_eq!(
            reg.gap_between(BridgeId::Olidebron, BridgeId::Stallbackabron),
            1550.0 + 600.0 + 650.0 + 2150.0
        );
        // Symmetric and zero on the diagonal
        assert_eq!(
            reg.gap_between(BridgeId::Stridsbergsbron, BridgeId::Klaffbron),
            reg.gap_between(BridgeId::Klaffbron, BridgeId::Stridsbergsbron)
        );
        assert_eq!(reg.gap_between(BridgeId::Klaffbron, BridgeId::Klaffbron), 0.0);
    }

    #[test]
    fn test_next_target_stepping_skips_intermediates() {
        let reg = BridgeRegistry::new();
        // Northbound past Klaffbron: next opening bridge is Stridsbergsbron,
        // not Järnvägsbron.
        assert_eq!(
            reg.next_target_after(BridgeId::Klaffbron, true),
            Some(BridgeId::Stridsbergsbron)
        );
        // Northbound past Stridsbergsbron: nothing opens further north.
        assert_eq!(reg.next_target_after(BridgeId::Stridsbergsbron, true), None);
        // Southbound past Stridsbergsbron: Klaffbron is next.
        assert_eq!(
            reg.next_target_after(BridgeId::Stridsbergsbron, false),
            Some(BridgeId::Klaffbron)
        );
        // Southbound past Klaffbron: journey complete.
        assert_eq!(reg.next_target_after(BridgeId::Klaffbron, false), None);
        // From the special bridge heading south the first target is
        // Stridsbergsbron.
        assert_eq!(
            reg.next_target_after(BridgeId::Stallbackabron, false),
            Some(BridgeId::Stridsbergsbron)
        );
    }

    #[test]
    fn test_id_round_trip() {
        for id in BridgeId::ALL {
            assert_eq!(BridgeId::from_str_id(id.as_str()), Some(id));
        }
        assert_eq!(BridgeId::from_str_id("nope"), None);
    }

    #[test]
    fn test_display_names_keep_unicode() {
        let reg = BridgeRegistry::new();
        assert_eq!(reg.get(BridgeId::Jarnvagsbron).name, "Järnvägsbron");
    }
}
