use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_TEAM: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DriverIdentity {
    pub code: String,
    pub full_name: String,
    pub team: String,
}

impl DriverIdentity {
    fn synthetic(raw: &str) -> Self {
        Self {
            code: raw.to_string(),
            full_name: raw.to_string(),
            team: UNKNOWN_TEAM.to_string(),
        }
    }
}

/// Raised (as data, not as an error) when a raw driver key has no mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedDriverWarning {
    pub raw: String,
}

impl std::fmt::Display for UnmappedDriverWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no driver mapping for '{}', using raw value", self.raw)
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub identity: DriverIdentity,
    pub warning: Option<UnmappedDriverWarning>,
}

struct DriverSeed {
    code: &'static str,
    full_name: &'static str,
    team: &'static str,
    aliases: &'static [&'static str],
}

// 2025 grid first, then drivers that only appear in 2024 sessions.
const DRIVER_SEEDS: &[DriverSeed] = &[
    DriverSeed { code: "VER", full_name: "Max Verstappen", team: "Red Bull", aliases: &[] },
    DriverSeed { code: "TSU", full_name: "Yuki Tsunoda", team: "Red Bull", aliases: &[] },
    DriverSeed { code: "NOR", full_name: "Lando Norris", team: "McLaren", aliases: &[] },
    DriverSeed { code: "PIA", full_name: "Oscar Piastri", team: "McLaren", aliases: &[] },
    DriverSeed { code: "LEC", full_name: "Charles Leclerc", team: "Ferrari", aliases: &[] },
    DriverSeed { code: "HAM", full_name: "Lewis Hamilton", team: "Ferrari", aliases: &[] },
    DriverSeed { code: "RUS", full_name: "George Russell", team: "Mercedes", aliases: &[] },
    DriverSeed {
        code: "ANT",
        full_name: "Andrea Kimi Antonelli",
        team: "Mercedes",
        aliases: &["Kimi Antonelli"],
    },
    DriverSeed { code: "ALO", full_name: "Fernando Alonso", team: "Aston Martin", aliases: &[] },
    DriverSeed { code: "STR", full_name: "Lance Stroll", team: "Aston Martin", aliases: &[] },
    DriverSeed { code: "GAS", full_name: "Pierre Gasly", team: "Alpine", aliases: &[] },
    DriverSeed { code: "DOO", full_name: "Jack Doohan", team: "Alpine", aliases: &[] },
    DriverSeed { code: "COL", full_name: "Franco Colapinto", team: "Alpine", aliases: &[] },
    DriverSeed { code: "OCO", full_name: "Esteban Ocon", team: "Haas", aliases: &[] },
    DriverSeed { code: "BEA", full_name: "Oliver Bearman", team: "Haas", aliases: &[] },
    DriverSeed { code: "ALB", full_name: "Alexander Albon", team: "Williams", aliases: &["Alex Albon"] },
    DriverSeed {
        code: "SAI",
        full_name: "Carlos Sainz",
        team: "Williams",
        aliases: &["Carlos Sainz Jr.", "Carlos Sainz Jr"],
    },
    DriverSeed {
        code: "HUL",
        full_name: "Nico Hülkenberg",
        team: "Kick Sauber",
        aliases: &["Nico Hulkenberg", "Hulkenberg"],
    },
    DriverSeed { code: "BOR", full_name: "Gabriel Bortoleto", team: "Kick Sauber", aliases: &[] },
    DriverSeed { code: "HAD", full_name: "Isack Hadjar", team: "Racing Bulls", aliases: &[] },
    DriverSeed { code: "LAW", full_name: "Liam Lawson", team: "Racing Bulls", aliases: &[] },
    DriverSeed { code: "PER", full_name: "Sergio Perez", team: "Red Bull", aliases: &["Sergio Pérez", "Checo Perez"] },
    DriverSeed { code: "RIC", full_name: "Daniel Ricciardo", team: "Racing Bulls", aliases: &[] },
    DriverSeed { code: "MAG", full_name: "Kevin Magnussen", team: "Haas", aliases: &[] },
    DriverSeed { code: "BOT", full_name: "Valtteri Bottas", team: "Kick Sauber", aliases: &[] },
    DriverSeed {
        code: "ZHO",
        full_name: "Zhou Guanyu",
        team: "Kick Sauber",
        aliases: &["Guanyu Zhou", "Zhou"],
    },
    DriverSeed { code: "SAR", full_name: "Logan Sargeant", team: "Williams", aliases: &[] },
];

const WET_PERFORMANCE_FACTORS: &[(&str, f64)] = &[
    ("VER", 0.975196),
    ("HAM", 0.976464),
    ("LEC", 0.975862),
    ("NOR", 0.978179),
    ("ALO", 0.972655),
    ("RUS", 0.968678),
    ("SAI", 0.978754),
    ("TSU", 0.996338),
    ("OCO", 0.981810),
    ("GAS", 0.978832),
    ("STR", 0.979857),
    ("PIA", 0.978000),
    ("ALB", 0.980000),
];

const CLEAN_AIR_RACE_PACE: &[(&str, f64)] = &[
    ("VER", 93.191067),
    ("HAM", 94.020622),
    ("LEC", 93.418667),
    ("NOR", 93.428600),
    ("ALO", 94.784333),
    ("PIA", 93.232111),
    ("RUS", 93.833378),
    ("SAI", 94.497444),
    ("STR", 95.318250),
    ("HUL", 95.345455),
    ("OCO", 95.682128),
    ("GAS", 95.500000),
    ("TSU", 95.400000),
    ("ALB", 95.600000),
];

// Constructor points at the reference cut-off of the season.
const CONSTRUCTOR_POINTS: &[(&str, f64)] = &[
    ("McLaren", 279.0),
    ("Mercedes", 147.0),
    ("Red Bull", 131.0),
    ("Ferrari", 114.0),
    ("Williams", 51.0),
    ("Haas", 20.0),
    ("Aston Martin", 14.0),
    ("Racing Bulls", 10.0),
    ("Alpine", 7.0),
    ("Kick Sauber", 6.0),
];

static REGISTRY: Lazy<DriverRegistry> = Lazy::new(DriverRegistry::from_seeds);

/// Read-only lookup from any known alias (code, full name, family name) to a
/// canonical identity.
#[derive(Debug)]
pub struct DriverRegistry {
    identities: Vec<DriverIdentity>,
    by_alias: HashMap<String, usize>,
}

impl DriverRegistry {
    pub fn global() -> &'static DriverRegistry {
        &REGISTRY
    }

    fn from_seeds() -> Self {
        let mut identities = Vec::with_capacity(DRIVER_SEEDS.len());
        let mut by_alias = HashMap::new();
        for seed in DRIVER_SEEDS {
            let idx = identities.len();
            identities.push(DriverIdentity {
                code: seed.code.to_string(),
                full_name: seed.full_name.to_string(),
                team: seed.team.to_string(),
            });
            by_alias.insert(alias_key(seed.code), idx);
            by_alias.insert(alias_key(seed.full_name), idx);
            if let Some(family) = seed.full_name.split_whitespace().last() {
                by_alias.entry(alias_key(family)).or_insert(idx);
            }
            for alias in seed.aliases {
                by_alias.insert(alias_key(alias), idx);
            }
        }
        Self { identities, by_alias }
    }

    pub fn lookup(&self, raw: &str) -> Option<&DriverIdentity> {
        self.by_alias
            .get(&alias_key(raw))
            .and_then(|idx| self.identities.get(*idx))
    }

    /// Never fails: an unknown key becomes a synthetic identity plus a warning
    /// the caller is expected to log.
    pub fn resolve(&self, raw: &str) -> Resolved {
        match self.lookup(raw) {
            Some(identity) => Resolved {
                identity: identity.clone(),
                warning: None,
            },
            None => {
                let trimmed = raw.trim();
                Resolved {
                    identity: DriverIdentity::synthetic(trimmed),
                    warning: Some(UnmappedDriverWarning {
                        raw: trimmed.to_string(),
                    }),
                }
            }
        }
    }

    pub fn identities(&self) -> &[DriverIdentity] {
        &self.identities
    }
}

fn alias_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn wet_performance_factor(code: &str) -> Option<f64> {
    table_lookup(WET_PERFORMANCE_FACTORS, code)
}

pub fn clean_air_race_pace(code: &str) -> Option<f64> {
    table_lookup(CLEAN_AIR_RACE_PACE, code)
}

pub fn constructor_points() -> HashMap<String, f64> {
    CONSTRUCTOR_POINTS
        .iter()
        .map(|(team, pts)| (team.to_string(), *pts))
        .collect()
}

fn table_lookup(table: &[(&str, f64)], code: &str) -> Option<f64> {
    table
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, value)| *value)
}
