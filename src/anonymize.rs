use std::collections::HashMap;

use crate::models::CombatEvent;

/// Replace player display names with deterministic pseudonyms (`Player1`,
/// `Player2`, ... in order of first appearance). Only names attached to a
/// player-prefixed GUID are substituted; NPC names pass through unchanged.
/// The mapping is scoped to one call, so nothing persists across files.
pub fn anonymize_events(events: &mut [CombatEvent]) {
    let mut pseudonyms: HashMap<String, String> = HashMap::new();

    for event in events.iter_mut() {
        for unit in [&mut event.source, &mut event.target] {
            if !unit.is_player() || unit.name.is_empty() {
                continue;
            }
            let next = pseudonyms.len() + 1;
            let alias = pseudonyms
                .entry(unit.guid.clone())
                .or_insert_with(|| format!("Player{next}"));
            unit.name = alias.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{aggregate, MetricsConfig};
    use crate::parser::parse_events;

    const LOG: &str = concat!(
        "4/20 18:23:12.345  SPELL_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Gutter Fiend\",0xa48,0x0,133,\"Fireball\",0x4,2500,0,-1\n",
        "4/20 18:23:13.345  SPELL_HEAL,Player-2-CCC,\"Mendy\",0x512,0x0,Player-1-AAA,\"Hero\",0x511,0x0,774,\"Rejuvenation\",0x8,1800,1800,0,0,nil\n",
        "4/20 18:23:14.345  SWING_DAMAGE,Creature-1-BBB,\"Gutter Fiend\",0xa48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,300,300,1,0,0,0\n",
    );

    #[test]
    fn test_pseudonyms_follow_first_appearance() {
        let (mut events, _) = parse_events(LOG);
        anonymize_events(&mut events);
        assert_eq!(events[0].source.name, "Player1");
        assert_eq!(events[1].source.name, "Player2");
        // Same GUID gets the same alias wherever it appears.
        assert_eq!(events[1].target.name, "Player1");
        assert_eq!(events[2].target.name, "Player1");
    }

    #[test]
    fn test_non_player_names_pass_through() {
        let (mut events, _) = parse_events(LOG);
        anonymize_events(&mut events);
        assert_eq!(events[0].target.name, "Gutter Fiend");
        assert_eq!(events[2].source.name, "Gutter Fiend");
    }

    #[test]
    fn test_anonymization_is_a_pure_renaming() {
        let (events, _) = parse_events(LOG);
        let mut renamed = events.clone();
        anonymize_events(&mut renamed);

        let config = MetricsConfig::default();
        let plain = aggregate(&events, None, &config);
        let anon = aggregate(&renamed, None, &config);

        assert_eq!(plain.total_damage, anon.total_damage);
        assert_eq!(plain.total_healing, anon.total_healing);
        assert_eq!(plain.dps, anon.dps);
        assert_eq!(plain.timeline, anon.timeline);
        assert_eq!(plain.avoidable_damage, anon.avoidable_damage);
        assert_eq!(plain.player_name, "Hero");
        assert_eq!(anon.player_name, "Player1");
    }

    #[test]
    fn test_repeated_calls_are_deterministic() {
        let (events, _) = parse_events(LOG);
        let mut first = events.clone();
        let mut second = events;
        anonymize_events(&mut first);
        anonymize_events(&mut second);
        assert_eq!(first, second);
    }
}
