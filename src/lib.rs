//! Combat log parsing and metrics engine.
//!
//! The engine is a pure function from an input text buffer (plus optional
//! flags) to an [`AnalysisReport`]: tokenize and classify the log once,
//! aggregate per-actor stats and a bucketed timeline in one pass, run a
//! filtered second pass for avoidable incoming damage, and render a compact
//! digest for the downstream text-generation caller. No state survives the
//! call. Callers are responsible for capping input size before invoking it.

pub mod anonymize;
pub mod api;
pub mod error;
pub mod metrics;
pub mod models;
pub mod parser;

pub use error::EngineError;
pub use metrics::MetricsConfig;
pub use models::{
    AnalysisReport, AvoidableDamageRecord, CombatEvent, EncounterInfo, EventKind, EventPayload,
    ParseDiagnostics, PerformanceSummary, Severity, TimelinePoint,
};

/// Per-call flags and tunables.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Substitute player names with deterministic pseudonyms before
    /// aggregation.
    pub anonymize: bool,
    /// Analyze this player instead of the one with the most events.
    pub target_player: Option<String>,
    pub config: MetricsConfig,
}

/// Validate without parsing: the cheap sniff-test for upload handlers.
pub fn validate(content: &str) -> Result<(), EngineError> {
    parser::validate(content)
}

/// Full pipeline over one buffer. The only error it can return is
/// [`EngineError::InvalidFormat`]; a structurally valid log with no player
/// events yields a default summary instead.
pub fn analyze(content: &str, options: &AnalyzeOptions) -> Result<AnalysisReport, EngineError> {
    parser::validate(content)?;
    let (mut events, diagnostics) = parser::parse_events(content);
    if options.anonymize {
        anonymize::anonymize_events(&mut events);
    }
    let performance = metrics::aggregate(
        &events,
        options.target_player.as_deref(),
        &options.config,
    );
    let digest = metrics::build_digest(&performance);
    Ok(AnalysisReport {
        performance,
        digest,
        events_processed: events.len(),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = concat!(
        "4/20 18:23:12.345  SWING_DAMAGE,Player-1-AAA,\"Hero\",0x511,0x0,Creature-1-BBB,\"Gutter Fiend\",0x10a48,0x0,1000,1000,1,0,0,0\n",
        "4/20 18:23:13.345  SWING_DAMAGE,Creature-1-BBB,\"Gutter Fiend\",0x10a48,0x0,Player-1-AAA,\"Hero\",0x511,0x0,300,300,1,0,0,0\n",
        "4/20 18:23:14.345  SPELL_HEAL,Player-1-AAA,\"Hero\",0x511,0x0,Player-1-AAA,\"Hero\",0x511,0x0,774,\"Rejuvenation\",0x8,1800,1800,0,0,nil\n",
    );

    #[test]
    fn test_analyze_end_to_end() {
        let report = analyze(LOG, &AnalyzeOptions::default()).unwrap();
        assert_eq!(report.events_processed, 3);
        assert_eq!(report.diagnostics.dropped(), 0);
        assert_eq!(report.performance.player_name, "Hero");
        assert_eq!(report.performance.total_damage, 1000);
        assert_eq!(report.performance.total_healing, 1800);
        assert!(report.digest.contains("PLAYER: Hero"));
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let options = AnalyzeOptions::default();
        let first = analyze(LOG, &options).unwrap();
        let second = analyze(LOG, &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_analyze_rejects_invalid_format() {
        let err = analyze("definitely not a combat log", &AnalyzeOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidFormat(_)));
    }

    #[test]
    fn test_analyze_with_anonymization() {
        let options = AnalyzeOptions {
            anonymize: true,
            ..AnalyzeOptions::default()
        };
        let report = analyze(LOG, &options).unwrap();
        assert_eq!(report.performance.player_name, "Player1");
        assert_eq!(report.performance.total_damage, 1000);
    }
}
