use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::models::*;

/// Tuned heuristics, kept as configurable constants rather than load-bearing
/// literals. The defaults mirror the observed behavior of the log format's
/// reference tooling.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Timeline bucket width in milliseconds.
    pub bucket_width_ms: i64,
    /// Fraction of the main actor's outgoing damage above which an
    /// avoidable-damage group is flagged critical instead of warning.
    pub critical_fraction: f64,
    /// How many avoidable-damage groups to keep after ranking.
    pub max_avoidable_entries: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bucket_width_ms: 5_000,
            critical_fraction: 0.10,
            max_avoidable_entries: 5,
        }
    }
}

/// Single forward pass over the event list producing the main actor's
/// summary. A log without any player-prefixed actors yields the default
/// summary, never an error.
pub fn aggregate(
    events: &[CombatEvent],
    name_hint: Option<&str>,
    config: &MetricsConfig,
) -> PerformanceSummary {
    let mut table = ActorTable::default();
    let mut timeline: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    let mut combatants: HashMap<String, (u32, u32)> = HashMap::new();
    let mut encounter = EncounterInfo::default();

    for event in events {
        match &event.payload {
            EventPayload::EncounterStart {
                boss_name,
                difficulty_id,
                ..
            } => {
                if !boss_name.is_empty() {
                    encounter.boss_name = boss_name.clone();
                }
                // A keystone run already labeled the whole log Mythic+.
                if encounter.keystone_level.is_none() {
                    if let Some(name) = difficulty_name(*difficulty_id) {
                        encounter.difficulty = name.to_string();
                    }
                }
            }
            EventPayload::EncounterEnd { success } => {
                encounter.outcome = if *success { Outcome::Kill } else { Outcome::Wipe };
            }
            EventPayload::ChallengeModeStart {
                zone_name,
                keystone_level,
            } => {
                if !zone_name.is_empty() {
                    encounter.zone_name = zone_name.clone();
                }
                encounter.difficulty = "Mythic+".to_string();
                if *keystone_level > 0 {
                    encounter.keystone_level = Some(*keystone_level);
                }
            }
            EventPayload::ChallengeModeEnd { success } => {
                encounter.outcome = if *success { Outcome::Kill } else { Outcome::Wipe };
            }
            EventPayload::CombatantInfo { class_id, spec_id } => {
                if event.source.is_player() {
                    combatants.insert(event.source.guid.clone(), (*class_id, *spec_id));
                }
            }
            _ => {}
        }
        if event.kind.is_special_shape() || !event.source.is_player() {
            continue;
        }

        let stats = table.entry(&event.source.guid);
        stats.event_count += 1;
        if !event.source.name.is_empty() {
            stats.display_name = event.source.name.clone();
        }
        if let Some(ms) = event.instant_ms {
            stats.observe_instant(ms);
        }

        if let Some(amount) = event.payload.damage_amount() {
            stats.damage_total += amount;
            if let Some(ms) = event.instant_ms {
                bucket_entry(&mut timeline, ms, config).0 += amount;
            }
        } else if let Some(amount) = event.payload.heal_amount() {
            stats.healing_total += amount;
            if let Some(ms) = event.instant_ms {
                bucket_entry(&mut timeline, ms, config).1 += amount;
            }
        }
    }

    let Some(main_idx) = table.select_main(name_hint) else {
        tracing::debug!("no player-prefixed actors found, returning default summary");
        return PerformanceSummary::default();
    };
    let main = table.get(main_idx);
    let duration = main.duration_secs();

    let (player_class, player_spec, role) = combatants
        .get(&main.guid)
        .map(|&(class_id, spec_id)| player_context(class_id, spec_id))
        .unwrap_or_else(|| {
            (
                "Unknown".to_string(),
                "Unknown".to_string(),
                "DPS".to_string(),
            )
        });

    let avoidable_damage = detect_avoidable(events, &main.guid, main.damage_total, config);
    let timeline = render_timeline(timeline, config);

    encounter.duration_secs = duration.round() as u64;

    PerformanceSummary {
        player_name: if main.display_name.is_empty() {
            "Unknown".to_string()
        } else {
            main.display_name.clone()
        },
        player_class,
        player_spec,
        role,
        total_damage: main.damage_total,
        total_healing: main.healing_total,
        dps: (main.damage_total as f64 / duration).round() as u64,
        hps: (main.healing_total as f64 / duration).round() as u64,
        fight_duration_secs: duration.round() as u64,
        timeline,
        avoidable_damage,
        encounter,
    }
}

fn bucket_entry<'a>(
    timeline: &'a mut BTreeMap<i64, (u64, u64)>,
    instant_ms: i64,
    config: &MetricsConfig,
) -> &'a mut (u64, u64) {
    let width = config.bucket_width_ms.max(1);
    let bucket = instant_ms.div_euclid(width) * width;
    timeline.entry(bucket).or_default()
}

/// Normalize bucket sums to per-second rates, ascending by bucket start.
/// Buckets with no events are omitted: a gap means "no data", which is a
/// different signal from a genuine zero-damage window.
fn render_timeline(
    timeline: BTreeMap<i64, (u64, u64)>,
    config: &MetricsConfig,
) -> Vec<TimelinePoint> {
    let width_secs = (config.bucket_width_ms as f64 / 1000.0).max(1.0);
    timeline
        .into_iter()
        .map(|(bucket_start_ms, (damage, healing))| TimelinePoint {
            bucket_start_ms,
            dps: (damage as f64 / width_secs).round() as u64,
            hps: (healing as f64 / width_secs).round() as u64,
        })
        .collect()
}

/// Second, filtered pass: incoming damage on the main actor from non-player
/// sources, grouped by ability and ranked by total damage. A heuristic proxy
/// for mechanic damage, not a mechanics-aware classifier.
fn detect_avoidable(
    events: &[CombatEvent],
    main_guid: &str,
    main_damage_total: u64,
    config: &MetricsConfig,
) -> Vec<AvoidableDamageRecord> {
    let mut groups: HashMap<String, (u32, u64)> = HashMap::new();

    for event in events {
        if !event.kind.is_damage() {
            continue;
        }
        if event.target.guid != main_guid || !event.source.is_creature() {
            continue;
        }
        let (ability, amount) = match &event.payload {
            EventPayload::SwingDamage { amount } => (MELEE_ABILITY.to_string(), *amount),
            EventPayload::SpellDamage {
                ability, amount, ..
            } => {
                let name = if ability.is_empty() {
                    "Unknown Ability".to_string()
                } else {
                    ability.clone()
                };
                (name, *amount)
            }
            _ => continue,
        };
        let group = groups.entry(ability).or_insert((0, 0));
        group.0 += 1;
        group.1 += amount;
    }

    let critical_floor = main_damage_total as f64 * config.critical_fraction;
    let mut records: Vec<AvoidableDamageRecord> = groups
        .into_iter()
        .map(|(ability_name, (hit_count, total_damage))| AvoidableDamageRecord {
            ability_name,
            hit_count,
            total_damage,
            severity: if total_damage as f64 > critical_floor {
                Severity::Critical
            } else {
                Severity::Warning
            },
        })
        .collect();
    records.sort_by(|a, b| {
        b.total_damage
            .cmp(&a.total_damage)
            .then_with(|| a.ability_name.cmp(&b.ability_name))
    });
    records.truncate(config.max_avoidable_entries);
    records
}

/// Render the summary into a compact line-oriented digest, bounded in size,
/// suitable for inclusion in a downstream prompt.
pub fn build_digest(summary: &PerformanceSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PLAYER: {}", summary.player_name);
    let _ = writeln!(
        out,
        "CLASS: {} {} ({})",
        summary.player_spec, summary.player_class, summary.role
    );
    let _ = writeln!(
        out,
        "DAMAGE: {} total, {} DPS",
        summary.total_damage, summary.dps
    );
    let _ = writeln!(
        out,
        "HEALING: {} total, {} HPS",
        summary.total_healing, summary.hps
    );
    let _ = writeln!(out, "DURATION: {}s", summary.fight_duration_secs);

    let enc = &summary.encounter;
    match enc.keystone_level {
        Some(level) => {
            let _ = writeln!(
                out,
                "ENCOUNTER: {} ({} +{}) - {:?}",
                enc.boss_name, enc.zone_name, level, enc.outcome
            );
        }
        None => {
            let _ = writeln!(
                out,
                "ENCOUNTER: {} ({}) - {:?}",
                enc.boss_name, enc.difficulty, enc.outcome
            );
        }
    }

    if !summary.avoidable_damage.is_empty() {
        let _ = writeln!(out, "AVOIDABLE DAMAGE TAKEN:");
        for record in &summary.avoidable_damage {
            let _ = writeln!(
                out,
                "- {}: {} hits for {} ({:?})",
                record.ability_name, record.hit_count, record.total_damage, record.severity
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_events;

    fn parse(log: &str) -> Vec<CombatEvent> {
        parse_events(log).0
    }

    const SCENARIO_A: &str = concat!(
        "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Gutter Fiend\",0x10a48,0x0,1000,1000,1,0,0,0\n",
        "4/20 18:23:13.345  SWING_DAMAGE,Creature-1-BBB,\"Gutter Fiend\",0x10a48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,300,300,1,0,0,0\n",
    );

    #[test]
    fn test_scenario_a_swing_exchange() {
        let events = parse(SCENARIO_A);
        assert_eq!(events.len(), 2);
        let summary = aggregate(&events, None, &MetricsConfig::default());

        assert_eq!(summary.player_name, "Hero");
        assert_eq!(summary.total_damage, 1000);
        assert_eq!(summary.avoidable_damage.len(), 1);
        let record = &summary.avoidable_damage[0];
        assert_eq!(record.ability_name, MELEE_ABILITY);
        assert_eq!(record.hit_count, 1);
        assert_eq!(record.total_damage, 300);
        // 300 > 10% of 1000
        assert_eq!(record.severity, Severity::Critical);
    }

    #[test]
    fn test_scenario_b_unknown_combatant_info_falls_back() {
        let log = concat!(
            "4/20 18:23:11.000  COMBATANT_INFO,Player-1-AAA,99,99999,450,2400\n",
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,1000,1000,1,0,0,0\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.player_class, "Unknown");
        assert_eq!(summary.player_spec, "Unknown");
        assert_eq!(summary.role, "DPS");
    }

    #[test]
    fn test_known_combatant_info_maps_class_and_spec() {
        let log = concat!(
            "4/20 18:23:11.000  COMBATANT_INFO,Player-1-AAA,10,268,450,2400\n",
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,1000,1000,1,0,0,0\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.player_class, "Monk");
        assert_eq!(summary.player_spec, "Brewmaster");
        assert_eq!(summary.role, "Tank");
    }

    #[test]
    fn test_scenario_c_no_players_yields_default_summary() {
        let log = concat!(
            "4/20 18:23:12.345  SWING_DAMAGE,Creature-1-BBB,\"Fiend\",0xa48,0x0,Creature-2-CCC,\"Other\",0xa48,0x0,500,500,1,0,0,0\n",
            "4/20 18:23:13.345  UNIT_DIED,0x0,nil,0x0,0x0,Creature-2-CCC,\"Other\",0xa48,0x0\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary, PerformanceSummary::default());
        assert_eq!(summary.total_damage, 0);
        assert!(summary.timeline.is_empty());
        assert!(summary.avoidable_damage.is_empty());
    }

    #[test]
    fn test_damage_conservation_across_actors() {
        let log = concat!(
            "4/20 18:23:12.345  SPELL_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,133,\"Fireball\",0x4,2500,0,-1\n",
            "4/20 18:23:13.345  SPELL_DAMAGE,Player-2-CCC,\"Mendy\",0x512,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,589,\"Shadow Word: Pain\",0x20,750,0,-1\n",
            "4/20 18:23:14.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,400,400,1,0,0,0\n",
        );
        let events = parse(log);
        let parsed_total: u64 = events
            .iter()
            .filter(|e| e.source.is_player())
            .filter_map(|e| e.payload.damage_amount())
            .sum();
        assert_eq!(parsed_total, 3650);

        let mut table = ActorTable::default();
        for event in &events {
            if event.source.is_player() {
                if let Some(amount) = event.payload.damage_amount() {
                    table.entry(&event.source.guid).damage_total += amount;
                }
            }
        }
        let actor_total: u64 = table.iter().map(|a| a.damage_total).sum();
        assert_eq!(actor_total, parsed_total);
    }

    #[test]
    fn test_main_actor_defaults_to_most_events() {
        let log = concat!(
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,100,100,1,0,0,0\n",
            "4/20 18:23:13.345  SWING_DAMAGE,Player-2-CCC,\"Mendy\",0x512,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,900,900,1,0,0,0\n",
            "4/20 18:23:14.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,100,100,1,0,0,0\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.player_name, "Hero");
        assert_eq!(summary.total_damage, 200);
    }

    #[test]
    fn test_main_actor_hint_overrides_event_count() {
        let log = concat!(
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,100,100,1,0,0,0\n",
            "4/20 18:23:13.345  SWING_DAMAGE,Player-2-CCC,\"Mendy\",0x512,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,900,900,1,0,0,0\n",
            "4/20 18:23:14.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,100,100,1,0,0,0\n",
        );
        let summary = aggregate(&parse(log), Some("mendy"), &MetricsConfig::default());
        assert_eq!(summary.player_name, "Mendy");
        assert_eq!(summary.total_damage, 900);
    }

    #[test]
    fn test_timeline_buckets_are_sparse_sorted_rates() {
        // Two hits in one 5s bucket, one hit 20s later; the gap is omitted.
        let log = concat!(
            "4/20 18:23:11.000  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,600,600,1,0,0,0\n",
            "4/20 18:23:12.000  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,400,400,1,0,0,0\n",
            "4/20 18:23:31.000  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,500,500,1,0,0,0\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.timeline.len(), 2);
        assert!(summary.timeline[0].bucket_start_ms < summary.timeline[1].bucket_start_ms);
        assert_eq!(summary.timeline[0].dps, 200); // (600 + 400) / 5
        assert_eq!(summary.timeline[1].dps, 100); // 500 / 5
        assert_eq!(summary.timeline[0].bucket_start_ms % 5_000, 0);
    }

    #[test]
    fn test_avoidable_severity_partition() {
        // Main actor deals 100_000; a 5_000 hit is warning, 20_000 critical.
        let log = concat!(
            "4/20 18:23:10.000  SPELL_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,133,\"Fireball\",0x4,100000,0,-1\n",
            "4/20 18:23:11.000  SPELL_DAMAGE,Creature-1-BBB,\"Fiend\",0xa48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,401,\"Toxic Pool\",0x8,5000,0,-1\n",
            "4/20 18:23:12.000  SPELL_DAMAGE,Creature-1-BBB,\"Fiend\",0xa48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,402,\"Shadow Nova\",0x20,20000,0,-1\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.avoidable_damage.len(), 2);
        assert_eq!(summary.avoidable_damage[0].ability_name, "Shadow Nova");
        assert_eq!(summary.avoidable_damage[0].severity, Severity::Critical);
        assert_eq!(summary.avoidable_damage[1].ability_name, "Toxic Pool");
        assert_eq!(summary.avoidable_damage[1].severity, Severity::Warning);
    }

    #[test]
    fn test_avoidable_list_is_truncated() {
        let mut log = String::from(
            "4/20 18:23:09.000  SPELL_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,133,\"Fireball\",0x4,100,0,-1\n",
        );
        for i in 0..8 {
            log.push_str(&format!(
                "4/20 18:23:1{}.000  SPELL_DAMAGE,Creature-1-BBB,\"Fiend\",0xa48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,40{i},\"Nova {i}\",0x20,{},0,-1\n",
                i, (i + 1) * 100
            ));
        }
        let summary = aggregate(&parse(&log), None, &MetricsConfig::default());
        assert_eq!(summary.avoidable_damage.len(), 5);
        // Ranked descending by total damage.
        assert_eq!(summary.avoidable_damage[0].ability_name, "Nova 7");
    }

    #[test]
    fn test_ignores_player_sourced_incoming_damage() {
        // Friendly fire from another player is not avoidable mechanic damage.
        let log = concat!(
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,1000,1000,1,0,0,0\n",
            "4/20 18:23:13.345  SPELL_DAMAGE,Player-2-CCC,\"Mendy\",0x512,0x0,Player-1-AAA,\"Hero\",0x511,0x0,589,\"Backfire\",0x20,50,0,-1\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert!(summary.avoidable_damage.is_empty());
    }

    #[test]
    fn test_encounter_info_harvesting() {
        let log = concat!(
            "4/20 18:20:00.000  CHALLENGE_MODE_START,\"Ara-Kara, City of Echoes\",2660,503,12,[160,9,10]\n",
            "4/20 18:21:00.000  ENCOUNTER_START,2902,\"Avanoxx\",8,5,2660\n",
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,1000,1000,1,0,0,0\n",
            "4/20 18:25:00.000  CHALLENGE_MODE_END,2660,0,12,0,904512,889000\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.encounter.zone_name, "Ara-Kara, City of Echoes");
        assert_eq!(summary.encounter.boss_name, "Avanoxx");
        assert_eq!(summary.encounter.difficulty, "Mythic+");
        assert_eq!(summary.encounter.keystone_level, Some(12));
        assert_eq!(summary.encounter.outcome, Outcome::Wipe);
    }

    #[test]
    fn test_raid_encounter_difficulty_mapping() {
        let log = concat!(
            "4/20 18:21:00.000  ENCOUNTER_START,2902,\"Ulgrax the Devourer\",16,20,2657\n",
            "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Fiend\",0xa48,0x0,1000,1000,1,0,0,0\n",
            "4/20 18:28:00.000  ENCOUNTER_END,2902,\"Ulgrax the Devourer\",16,20,1,420000\n",
        );
        let summary = aggregate(&parse(log), None, &MetricsConfig::default());
        assert_eq!(summary.encounter.boss_name, "Ulgrax the Devourer");
        assert_eq!(summary.encounter.difficulty, "Mythic (Raid)");
        assert_eq!(summary.encounter.keystone_level, None);
        assert_eq!(summary.encounter.outcome, Outcome::Kill);
    }

    #[test]
    fn test_duration_clamped_to_one_second() {
        let summary = aggregate(&parse(SCENARIO_A), None, &MetricsConfig::default());
        // Only one player-sourced event, so first == last seen.
        assert_eq!(summary.fight_duration_secs, 1);
        assert_eq!(summary.dps, 1000);
    }

    #[test]
    fn test_digest_is_compact_and_complete() {
        let summary = aggregate(&parse(SCENARIO_A), None, &MetricsConfig::default());
        let digest = build_digest(&summary);
        assert!(digest.contains("PLAYER: Hero"));
        assert!(digest.contains("DAMAGE: 1000 total"));
        assert!(digest.contains("Melee: 1 hits for 300"));
        assert!(digest.lines().count() <= 8 + summary.avoidable_damage.len());
    }
}
