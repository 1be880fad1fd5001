//! End-to-end: a real search's summary lands in the NDJSON stream.

use sente_core::Position;
use sente_logging::{now_ms, CandidateV1, NdjsonWriter, SearchRootEventV1};
use sente_mcts::{Search, SearchConfig, ThinkBudget, UniformEvaluator};

#[test]
fn search_summary_round_trips_through_the_event_log() {
    let cfg = SearchConfig {
        workers: 1,
        seed: 11,
        ..SearchConfig::default()
    };
    let mut search = Search::new(cfg, UniformEvaluator, Position::new(5, 7.5)).unwrap();
    let chosen = search.think(ThinkBudget::playouts(128)).unwrap();
    let summary = search.summary(5);
    let stats = search.stats().clone();

    let event = SearchRootEventV1 {
        event: SearchRootEventV1::EVENT,
        ts_ms: now_ms(),
        move_num: search.root_state().move_num(),
        to_move: summary.to_move.clone(),
        chosen: chosen.to_string(),
        root_visits: summary.root_visits,
        root_value: summary.root_value,
        playouts: stats.playouts,
        collisions: stats.collisions,
        elapsed_ms: stats.elapsed_ms,
        workers: search.cfg().workers,
        pv: search
            .principal_variation(6)
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        candidates: summary
            .lines
            .iter()
            .map(|l| CandidateV1 {
                mv: l.mv.clone(),
                visits: l.visits,
                winrate: l.winrate,
                lcb: l.lcb,
                prior: l.prior,
            })
            .collect(),
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("moves.ndjson");
    let mut writer = NdjsonWriter::open_append(&path).unwrap();
    writer.write_event(&event).unwrap();
    writer.flush().unwrap();

    let events = sente_logging::read_events_lenient(&path).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"], "search_root_v1");
    assert_eq!(events[0]["root_visits"], 128);
    assert_eq!(events[0]["chosen"], chosen.to_string());
    assert!(!events[0]["candidates"].as_array().unwrap().is_empty());
}
