use std::collections::HashMap;

use serde::Serialize;

/// GUID prefix that marks a human-controlled character.
pub const PLAYER_GUID_PREFIX: &str = "Player-";
/// GUID prefix that marks an NPC.
pub const CREATURE_GUID_PREFIX: &str = "Creature-";
/// Sentinel ability name for auto-attacks, which carry no spell identifier.
pub const MELEE_ABILITY: &str = "Melee";

/// One combatant as it appears on a log line: GUID, quoted display name
/// and the raw flags field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    pub guid: String,
    pub name: String,
    pub flags: String,
}

impl Unit {
    pub fn is_player(&self) -> bool {
        self.guid.starts_with(PLAYER_GUID_PREFIX)
    }

    pub fn is_creature(&self) -> bool {
        self.guid.starts_with(CREATURE_GUID_PREFIX)
    }
}

/// The closed set of event kinds the engine retains. `from_token` is the
/// sole gate: anything it does not recognize is dropped at classification
/// time and never becomes a `CombatEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SwingDamage,
    SwingDamageLanded,
    SpellDamage,
    SpellPeriodicDamage,
    RangeDamage,
    SpellHeal,
    SpellPeriodicHeal,
    SpellHealAbsorbed,
    SpellCastStart,
    SpellCastSuccess,
    SpellAuraApplied,
    SpellAuraRemoved,
    SpellMissed,
    SwingMissed,
    SpellInterrupt,
    UnitDied,
    EncounterStart,
    EncounterEnd,
    ChallengeModeStart,
    ChallengeModeEnd,
    CombatantInfo,
}

impl EventKind {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "SWING_DAMAGE" => Some(Self::SwingDamage),
            "SWING_DAMAGE_LANDED" => Some(Self::SwingDamageLanded),
            "SPELL_DAMAGE" => Some(Self::SpellDamage),
            "SPELL_PERIODIC_DAMAGE" => Some(Self::SpellPeriodicDamage),
            "RANGE_DAMAGE" => Some(Self::RangeDamage),
            "SPELL_HEAL" => Some(Self::SpellHeal),
            "SPELL_PERIODIC_HEAL" => Some(Self::SpellPeriodicHeal),
            "SPELL_HEAL_ABSORBED" => Some(Self::SpellHealAbsorbed),
            "SPELL_CAST_START" => Some(Self::SpellCastStart),
            "SPELL_CAST_SUCCESS" => Some(Self::SpellCastSuccess),
            "SPELL_AURA_APPLIED" => Some(Self::SpellAuraApplied),
            "SPELL_AURA_REMOVED" => Some(Self::SpellAuraRemoved),
            "SPELL_MISSED" => Some(Self::SpellMissed),
            "SWING_MISSED" => Some(Self::SwingMissed),
            "SPELL_INTERRUPT" => Some(Self::SpellInterrupt),
            "UNIT_DIED" => Some(Self::UnitDied),
            "ENCOUNTER_START" => Some(Self::EncounterStart),
            "ENCOUNTER_END" => Some(Self::EncounterEnd),
            "CHALLENGE_MODE_START" => Some(Self::ChallengeModeStart),
            "CHALLENGE_MODE_END" => Some(Self::ChallengeModeEnd),
            "COMBATANT_INFO" => Some(Self::CombatantInfo),
            _ => None,
        }
    }

    pub fn is_damage(self) -> bool {
        matches!(
            self,
            Self::SwingDamage
                | Self::SwingDamageLanded
                | Self::SpellDamage
                | Self::SpellPeriodicDamage
                | Self::RangeDamage
        )
    }

    pub fn is_heal(self) -> bool {
        matches!(
            self,
            Self::SpellHeal | Self::SpellPeriodicHeal | Self::SpellHealAbsorbed
        )
    }

    /// Kinds that use the short line shape without a source/target pair.
    pub fn is_special_shape(self) -> bool {
        matches!(
            self,
            Self::EncounterStart
                | Self::EncounterEnd
                | Self::ChallengeModeStart
                | Self::ChallengeModeEnd
                | Self::CombatantInfo
        )
    }
}

/// Kind-specific payload, typed at construction time so nothing downstream
/// ever indexes into a loose field array.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SwingDamage {
        amount: u64,
    },
    SpellDamage {
        spell_id: u64,
        ability: String,
        amount: u64,
    },
    Heal {
        spell_id: u64,
        ability: String,
        amount: u64,
    },
    Cast {
        spell_id: u64,
        ability: String,
    },
    Aura {
        spell_id: u64,
        ability: String,
    },
    Missed {
        ability: String,
        miss_type: String,
    },
    Interrupt {
        ability: String,
        interrupted: String,
    },
    UnitDied,
    EncounterStart {
        encounter_id: u64,
        boss_name: String,
        difficulty_id: u32,
        group_size: u32,
    },
    EncounterEnd {
        success: bool,
    },
    ChallengeModeStart {
        zone_name: String,
        keystone_level: u32,
    },
    ChallengeModeEnd {
        success: bool,
    },
    CombatantInfo {
        class_id: u32,
        spec_id: u32,
    },
}

impl EventPayload {
    pub fn damage_amount(&self) -> Option<u64> {
        match self {
            Self::SwingDamage { amount } | Self::SpellDamage { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    pub fn heal_amount(&self) -> Option<u64> {
        match self {
            Self::Heal { amount, .. } => Some(*amount),
            _ => None,
        }
    }
}

/// A classified log line. Immutable once constructed; the anonymizer is the
/// one exception, rewriting display names before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct CombatEvent {
    /// Raw timestamp text, format-preserving.
    pub timestamp: String,
    /// Normalized instant in milliseconds, comparable only within one
    /// parse call.
    pub instant_ms: Option<i64>,
    pub kind: EventKind,
    pub source: Unit,
    pub target: Unit,
    pub payload: EventPayload,
}

/// Running per-actor accumulator. Only ever grows during the single
/// aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct ActorStats {
    pub guid: String,
    pub display_name: String,
    pub damage_total: u64,
    pub healing_total: u64,
    pub event_count: u64,
    pub first_seen_ms: Option<i64>,
    pub last_seen_ms: Option<i64>,
}

impl ActorStats {
    pub fn observe_instant(&mut self, ms: i64) {
        if self.first_seen_ms.is_none() {
            self.first_seen_ms = Some(ms);
        }
        self.last_seen_ms = Some(ms);
    }

    /// Active duration in seconds, clamped to at least one second so rate
    /// math never divides by zero.
    pub fn duration_secs(&self) -> f64 {
        match (self.first_seen_ms, self.last_seen_ms) {
            (Some(first), Some(last)) => ((last - first) as f64 / 1000.0).max(1.0),
            _ => 1.0,
        }
    }
}

/// Dense actor table: each GUID gets an integer index at first sight and the
/// stats live in an indexed vec. Avoids hashing on every event and makes
/// main-actor selection a linear scan.
#[derive(Debug, Default)]
pub struct ActorTable {
    actors: Vec<ActorStats>,
    index: HashMap<String, usize>,
}

impl ActorTable {
    pub fn entry(&mut self, guid: &str) -> &mut ActorStats {
        let idx = match self.index.get(guid) {
            Some(&idx) => idx,
            None => {
                let idx = self.actors.len();
                self.actors.push(ActorStats {
                    guid: guid.to_string(),
                    ..ActorStats::default()
                });
                self.index.insert(guid.to_string(), idx);
                idx
            }
        };
        &mut self.actors[idx]
    }

    pub fn get(&self, idx: usize) -> &ActorStats {
        &self.actors[idx]
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActorStats> {
        self.actors.iter()
    }

    /// Pick the aggregation subject: a case-insensitive name hint wins,
    /// otherwise the actor with the most events (the owning client logs its
    /// own actions most densely).
    pub fn select_main(&self, name_hint: Option<&str>) -> Option<usize> {
        if let Some(hint) = name_hint {
            if let Some(idx) = self
                .actors
                .iter()
                .position(|a| a.display_name.eq_ignore_ascii_case(hint))
            {
                return Some(idx);
            }
        }
        self.actors
            .iter()
            .enumerate()
            .max_by_key(|(_, a)| a.event_count)
            .map(|(idx, _)| idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

/// One ranked entry of incoming non-player damage on the main actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvoidableDamageRecord {
    pub ability_name: String,
    pub hit_count: u32,
    pub total_damage: u64,
    pub severity: Severity,
}

/// One timeline bucket, normalized to per-second rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub bucket_start_ms: i64,
    pub dps: u64,
    pub hps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Kill,
    Wipe,
}

/// Best-effort encounter context, harvested opportunistically from
/// ENCOUNTER_* and CHALLENGE_MODE_* events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterInfo {
    pub boss_name: String,
    pub difficulty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystone_level: Option<u32>,
    pub zone_name: String,
    pub duration_secs: u64,
    pub outcome: Outcome,
}

impl Default for EncounterInfo {
    fn default() -> Self {
        Self {
            boss_name: "Unknown Boss".to_string(),
            difficulty: "Normal".to_string(),
            keystone_level: None,
            zone_name: "Unknown Zone".to_string(),
            duration_secs: 0,
            outcome: Outcome::Kill,
        }
    }
}

/// The externally consumed aggregate for the main actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub player_name: String,
    pub player_class: String,
    pub player_spec: String,
    pub role: String,
    pub total_damage: u64,
    pub total_healing: u64,
    pub dps: u64,
    pub hps: u64,
    pub fight_duration_secs: u64,
    pub timeline: Vec<TimelinePoint>,
    pub avoidable_damage: Vec<AvoidableDamageRecord>,
    pub encounter: EncounterInfo,
}

impl Default for PerformanceSummary {
    fn default() -> Self {
        Self {
            player_name: "Unknown".to_string(),
            player_class: "Unknown".to_string(),
            player_spec: "Unknown".to_string(),
            role: "DPS".to_string(),
            total_damage: 0,
            total_healing: 0,
            dps: 0,
            hps: 0,
            fight_duration_secs: 0,
            timeline: Vec::new(),
            avoidable_damage: Vec::new(),
            encounter: EncounterInfo::default(),
        }
    }
}

/// Drop counters for the silent-drop policy. Never surfaced as errors;
/// tests and logs can assert on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseDiagnostics {
    pub total_lines: u64,
    pub skipped_short: u64,
    pub missing_timestamp: u64,
    pub unknown_kind: u64,
    pub malformed_shape: u64,
}

impl ParseDiagnostics {
    pub fn dropped(&self) -> u64 {
        self.skipped_short + self.missing_timestamp + self.unknown_kind + self.malformed_shape
    }
}

/// Everything one parse call returns: the structured summary, a compact
/// text digest for the downstream prompt, and the drop counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub performance: PerformanceSummary,
    pub digest: String,
    pub events_processed: usize,
    pub diagnostics: ParseDiagnostics,
}

/// Map a specialization ID to (class, spec, role).
pub fn spec_info(spec_id: u32) -> Option<(&'static str, &'static str, &'static str)> {
    match spec_id {
        // Warrior
        71 => Some(("Warrior", "Arms", "DPS")),
        72 => Some(("Warrior", "Fury", "DPS")),
        73 => Some(("Warrior", "Protection", "Tank")),
        // Paladin
        65 => Some(("Paladin", "Holy", "Healer")),
        66 => Some(("Paladin", "Protection", "Tank")),
        70 => Some(("Paladin", "Retribution", "DPS")),
        // Hunter
        253 => Some(("Hunter", "Beast Mastery", "DPS")),
        254 => Some(("Hunter", "Marksmanship", "DPS")),
        255 => Some(("Hunter", "Survival", "DPS")),
        // Rogue
        259 => Some(("Rogue", "Assassination", "DPS")),
        260 => Some(("Rogue", "Outlaw", "DPS")),
        261 => Some(("Rogue", "Subtlety", "DPS")),
        // Priest
        256 => Some(("Priest", "Discipline", "Healer")),
        257 => Some(("Priest", "Holy", "Healer")),
        258 => Some(("Priest", "Shadow", "DPS")),
        // Death Knight
        250 => Some(("Death Knight", "Blood", "Tank")),
        251 => Some(("Death Knight", "Frost", "DPS")),
        252 => Some(("Death Knight", "Unholy", "DPS")),
        // Shaman
        262 => Some(("Shaman", "Elemental", "DPS")),
        263 => Some(("Shaman", "Enhancement", "DPS")),
        264 => Some(("Shaman", "Restoration", "Healer")),
        // Mage
        62 => Some(("Mage", "Arcane", "DPS")),
        63 => Some(("Mage", "Fire", "DPS")),
        64 => Some(("Mage", "Frost", "DPS")),
        // Warlock
        265 => Some(("Warlock", "Affliction", "DPS")),
        266 => Some(("Warlock", "Demonology", "DPS")),
        267 => Some(("Warlock", "Destruction", "DPS")),
        // Monk
        268 => Some(("Monk", "Brewmaster", "Tank")),
        269 => Some(("Monk", "Windwalker", "DPS")),
        270 => Some(("Monk", "Mistweaver", "Healer")),
        // Druid
        102 => Some(("Druid", "Balance", "DPS")),
        103 => Some(("Druid", "Feral", "DPS")),
        104 => Some(("Druid", "Guardian", "Tank")),
        105 => Some(("Druid", "Restoration", "Healer")),
        // Demon Hunter
        577 => Some(("Demon Hunter", "Havoc", "DPS")),
        581 => Some(("Demon Hunter", "Vengeance", "Tank")),
        // Evoker
        1467 => Some(("Evoker", "Devastation", "DPS")),
        1468 => Some(("Evoker", "Preservation", "Healer")),
        1473 => Some(("Evoker", "Augmentation", "DPS")),
        _ => None,
    }
}

/// Map an encounter difficulty ID to a display name.
pub fn difficulty_name(id: u32) -> Option<&'static str> {
    match id {
        1 => Some("Normal"),
        2 => Some("Heroic"),
        8 => Some("Mythic Keystone"),
        14 => Some("Normal (Raid)"),
        15 => Some("Heroic (Raid)"),
        16 => Some("Mythic (Raid)"),
        17 => Some("Looking for Raid"),
        23 => Some("Mythic"),
        24 => Some("Timewalking"),
        _ => None,
    }
}

/// Map a class ID to a class name, for COMBATANT_INFO lines whose spec ID
/// is off the table.
pub fn class_name(class_id: u32) -> Option<&'static str> {
    match class_id {
        1 => Some("Warrior"),
        2 => Some("Paladin"),
        3 => Some("Hunter"),
        4 => Some("Rogue"),
        5 => Some("Priest"),
        6 => Some("Death Knight"),
        7 => Some("Shaman"),
        8 => Some("Mage"),
        9 => Some("Warlock"),
        10 => Some("Monk"),
        11 => Some("Druid"),
        12 => Some("Demon Hunter"),
        13 => Some("Evoker"),
        _ => None,
    }
}

/// Resolve class/spec/role for a combatant, falling back to
/// Unknown/Unknown/DPS when the identifiers are off the known tables.
pub fn player_context(class_id: u32, spec_id: u32) -> (String, String, String) {
    if let Some((class, spec, role)) = spec_info(spec_id) {
        return (class.to_string(), spec.to_string(), role.to_string());
    }
    let class = class_name(class_id).unwrap_or("Unknown");
    (class.to_string(), "Unknown".to_string(), "DPS".to_string())
}
