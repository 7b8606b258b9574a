use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::EngineError;
use crate::models::*;

/// Buffers smaller than this cannot plausibly be a combat log.
const MIN_BUFFER_BYTES: usize = 100;
/// How many non-blank lines the validator samples.
const SAMPLE_LINES: usize = 20;
/// How many sampled lines must look like combat events.
const MIN_SAMPLE_MATCHES: usize = 2;
/// Header token emitted at the top of every client log.
const HEADER_TOKEN: &str = "COMBAT_LOG_VERSION";
/// Lines shorter than this are truncation artifacts, skipped outright.
const MIN_LINE_BYTES: usize = 20;
/// Standard-shape events carry at least kind + source/target id, name,
/// flags and raid-flags columns.
const MIN_STANDARD_FIELDS: usize = 9;
/// Classic timestamps carry no date; anchor them to a fixed synthetic year
/// so duration arithmetic works within one parse call.
const ANCHOR_YEAR: i32 = 2000;

/// Cheap structural sniff-test. Deliberately permissive: a false positive
/// just means the tokenizer drops unrecognized lines later, while rejecting
/// a real log costs the user a confusing round-trip.
pub fn validate(content: &str) -> Result<(), EngineError> {
    let content = strip_bom(content);
    if content.len() < MIN_BUFFER_BYTES {
        return Err(EngineError::InvalidFormat(
            "file is too short to be a combat log".to_string(),
        ));
    }

    let mut sampled = 0usize;
    let mut matched = 0usize;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        sampled += 1;
        if split_timestamp(line).is_some() || line.contains(HEADER_TOKEN) {
            matched += 1;
            if matched >= MIN_SAMPLE_MATCHES {
                return Ok(());
            }
        }
        if sampled >= SAMPLE_LINES {
            break;
        }
    }

    if sampled < MIN_SAMPLE_MATCHES {
        return Err(EngineError::InvalidFormat(
            "file contains too few lines to be a combat log".to_string(),
        ));
    }
    Err(EngineError::InvalidFormat(
        "no recognizable combat log events in the first lines".to_string(),
    ))
}

/// Tokenize and classify a whole buffer. Malformed lines never raise; they
/// increment a diagnostics counter and are excluded from the output.
pub fn parse_events(content: &str) -> (Vec<CombatEvent>, ParseDiagnostics) {
    let content = strip_bom(content);
    let mut events = Vec::new();
    let mut diag = ParseDiagnostics::default();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        diag.total_lines += 1;
        if line.len() < MIN_LINE_BYTES {
            diag.skipped_short += 1;
            continue;
        }
        let Some((timestamp, rest)) = split_timestamp(line) else {
            diag.missing_timestamp += 1;
            continue;
        };
        let fields = split_fields(rest);
        let Some(kind) = fields.first().and_then(|t| EventKind::from_token(t)) else {
            diag.unknown_kind += 1;
            continue;
        };
        match classify(kind, timestamp, &fields) {
            Some(event) => events.push(event),
            None => diag.malformed_shape += 1,
        }
    }

    tracing::debug!(
        events = events.len(),
        lines = diag.total_lines,
        dropped = diag.dropped(),
        "tokenized combat log"
    );
    (events, diag)
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

/// Split a line into timestamp prefix and event payload. Two accepted
/// variants, first match wins: the classic `M/D H:MM:SS.fff` prefix ends at
/// a double space; the ISO prefix contains a `T` and ends at the first run
/// of spaces.
fn split_timestamp(line: &str) -> Option<(&str, &str)> {
    if let Some(pos) = line.find("  ") {
        let ts = &line[..pos];
        if parse_instant(ts).is_some() {
            return Some((ts, line[pos + 2..].trim_start()));
        }
    }
    let pos = line.find(' ')?;
    let ts = &line[..pos];
    if ts.contains('T') && parse_instant(ts).is_some() {
        return Some((ts, line[pos + 1..].trim_start()));
    }
    None
}

/// Normalize a timestamp to milliseconds. ISO timestamps parse directly;
/// classic ones are anchored to `ANCHOR_YEAR` unless the log carries an
/// explicit year part. Instants are only comparable within one parse call.
pub fn parse_instant(ts: &str) -> Option<i64> {
    if ts.contains('T') {
        let dt = NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        return Some(dt.and_utc().timestamp_millis());
    }

    let (date_part, time_part) = ts.split_once(' ')?;
    let mut date_it = date_part.split('/');
    let month: u32 = date_it.next()?.parse().ok()?;
    let day: u32 = date_it.next()?.parse().ok()?;
    let year: i32 = date_it
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(ANCHOR_YEAR);

    let (hms, frac) = time_part.split_once('.')?;
    let mut hms_it = hms.split(':');
    let hour: u32 = hms_it.next()?.parse().ok()?;
    let minute: u32 = hms_it.next()?.parse().ok()?;
    let second: u32 = hms_it.next()?.parse().ok()?;
    if hms_it.next().is_some() {
        return None;
    }

    // Newer clients append a UTC offset after the fraction; ignore it.
    let frac = frac
        .split_once(['+', '-'])
        .map_or(frac, |(digits, _)| digits);
    if frac.len() < 2 || frac.len() > 4 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let frac_val: u32 = frac.parse().ok()?;
    let millis = match frac.len() {
        2 => frac_val * 10,
        3 => frac_val,
        _ => frac_val / 10,
    };

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;
    Some(NaiveDateTime::new(date, time).and_utc().timestamp_millis())
}

/// Split the payload on commas with a scanning state machine: a comma inside
/// double quotes or inside `[...]`/`(...)` nesting is part of the field.
fn split_fields(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut fields = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    let mut depth: i32 = 0;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'[' | b'(' if !in_quotes => depth += 1,
            b']' | b')' if !in_quotes => depth -= 1,
            b',' if !in_quotes && depth <= 0 => {
                fields.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(input[start..].trim());
    fields
}

/// Strip one surrounding quote pair from a name-like field and blank the
/// client's `nil` placeholder.
fn clean_name(field: &str) -> String {
    let s = field.trim();
    let s = s.strip_prefix('"').unwrap_or(s);
    let s = s.strip_suffix('"').unwrap_or(s);
    if s == "nil" {
        String::new()
    } else {
        s.to_string()
    }
}

fn parse_u64(field: Option<&&str>) -> u64 {
    field.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

fn parse_u32(field: Option<&&str>) -> u32 {
    field.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

/// Build a typed `CombatEvent` from a tokenized line, or `None` when the
/// field list does not fit the kind's shape.
fn classify(kind: EventKind, timestamp: &str, fields: &[&str]) -> Option<CombatEvent> {
    let instant_ms = parse_instant(timestamp);

    // Special-shape kinds come before the generic field-count check.
    if kind.is_special_shape() {
        let payload = match kind {
            EventKind::EncounterStart => EventPayload::EncounterStart {
                encounter_id: parse_u64(fields.get(1)),
                boss_name: clean_name(fields.get(2).unwrap_or(&"")),
                difficulty_id: parse_u32(fields.get(3)),
                group_size: parse_u32(fields.get(4)),
            },
            EventKind::EncounterEnd => EventPayload::EncounterEnd {
                success: parse_u32(fields.get(5)) == 1,
            },
            EventKind::ChallengeModeStart => EventPayload::ChallengeModeStart {
                zone_name: clean_name(fields.get(1).unwrap_or(&"")),
                keystone_level: parse_u32(fields.get(4)),
            },
            EventKind::ChallengeModeEnd => EventPayload::ChallengeModeEnd {
                success: parse_u32(fields.get(2)) == 1,
            },
            EventKind::CombatantInfo => EventPayload::CombatantInfo {
                class_id: parse_u32(fields.get(2)),
                spec_id: parse_u32(fields.get(3)),
            },
            _ => return None,
        };
        // COMBATANT_INFO carries the player GUID in its first payload slot.
        let source = if kind == EventKind::CombatantInfo {
            Unit {
                guid: fields.get(1).unwrap_or(&"").to_string(),
                ..Unit::default()
            }
        } else {
            Unit::default()
        };
        return Some(CombatEvent {
            timestamp: timestamp.to_string(),
            instant_ms,
            kind,
            source,
            target: Unit::default(),
            payload,
        });
    }

    if fields.len() < MIN_STANDARD_FIELDS {
        return None;
    }
    let source = Unit {
        guid: fields[1].to_string(),
        name: clean_name(fields[2]),
        flags: fields[3].to_string(),
    };
    let target = Unit {
        guid: fields[5].to_string(),
        name: clean_name(fields[6]),
        flags: fields[7].to_string(),
    };
    // Kind-specific columns start after both raid-flags columns.
    let tail = &fields[MIN_STANDARD_FIELDS..];

    let payload = match kind {
        EventKind::SwingDamage | EventKind::SwingDamageLanded => EventPayload::SwingDamage {
            amount: parse_u64(tail.first()),
        },
        EventKind::SpellDamage | EventKind::SpellPeriodicDamage | EventKind::RangeDamage => {
            EventPayload::SpellDamage {
                spell_id: parse_u64(tail.first()),
                ability: clean_name(tail.get(1).unwrap_or(&"")),
                amount: parse_u64(tail.get(3)),
            }
        }
        EventKind::SpellHeal | EventKind::SpellPeriodicHeal | EventKind::SpellHealAbsorbed => {
            EventPayload::Heal {
                spell_id: parse_u64(tail.first()),
                ability: clean_name(tail.get(1).unwrap_or(&"")),
                amount: parse_u64(tail.get(3)),
            }
        }
        EventKind::SpellCastStart | EventKind::SpellCastSuccess => EventPayload::Cast {
            spell_id: parse_u64(tail.first()),
            ability: clean_name(tail.get(1).unwrap_or(&"")),
        },
        EventKind::SpellAuraApplied | EventKind::SpellAuraRemoved => EventPayload::Aura {
            spell_id: parse_u64(tail.first()),
            ability: clean_name(tail.get(1).unwrap_or(&"")),
        },
        EventKind::SpellMissed => EventPayload::Missed {
            ability: clean_name(tail.get(1).unwrap_or(&"")),
            miss_type: clean_name(tail.get(3).unwrap_or(&"")),
        },
        EventKind::SwingMissed => EventPayload::Missed {
            ability: MELEE_ABILITY.to_string(),
            miss_type: clean_name(tail.first().unwrap_or(&"")),
        },
        EventKind::SpellInterrupt => EventPayload::Interrupt {
            ability: clean_name(tail.get(1).unwrap_or(&"")),
            interrupted: clean_name(tail.get(4).unwrap_or(&"")),
        },
        EventKind::UnitDied => EventPayload::UnitDied,
        _ => return None,
    };

    Some(CombatEvent {
        timestamp: timestamp.to_string(),
        instant_ms,
        kind,
        source,
        target,
        payload,
    })
}
