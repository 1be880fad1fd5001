//! Search driver: worker pool, budgets, think/ponder, final move choice.
//!
//! A fixed pool of worker threads shares one tree rooted at the current
//! position. There is no tree-wide lock; the per-node expansion claim is
//! the only strict ordering. With more than one worker the playout
//! interleaving is not deterministic, and neither is the exact visit
//! distribution.

use crate::config::{SearchConfig, ThinkBudget};
use crate::eval::{EvalError, Evaluator};
use crate::node::Node;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sente_core::{Color, Move, PlayError, Position};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Per-worker seed stride (odd, splits the run seed into distinct streams).
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid config: {msg}")]
    InvalidConfig { msg: &'static str },
    #[error("evaluator failed: {0}")]
    Evaluator(#[from] EvalError),
    #[error("rules engine rejected a tree move: {0}")]
    Play(#[from] PlayError),
}

/// Counters for one think/ponder run.
#[derive(Debug, Default, Clone)]
pub struct SearchStats {
    /// Playouts that completed a backup.
    pub playouts: u32,
    /// Playouts abandoned on a lost expansion race.
    pub collisions: u32,
    /// Playouts that ended on a terminal or sink node.
    pub terminal_playouts: u32,
    pub root_visits: u32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    playouts: AtomicU32,
    collisions: AtomicU32,
    terminals: AtomicU32,
}

impl Counters {
    fn reset(&self) {
        self.playouts.store(0, Ordering::Relaxed);
        self.collisions.store(0, Ordering::Relaxed);
        self.terminals.store(0, Ordering::Relaxed);
    }
}

/// Cloneable handle for stopping a running search from another thread
/// (the protocol front end's `stop`).
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Resolved stop conditions for one run.
struct Limits {
    max_playouts: u32,
    max_visits: u32,
    deadline: Option<Instant>,
}

/// One root candidate in a diagnostic summary.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateLine {
    pub mv: String,
    pub visits: u32,
    pub winrate: f32,
    pub lcb: f32,
    pub prior: f32,
    pub pv: String,
}

/// Diagnostic root report for the protocol front end.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub to_move: String,
    pub root_visits: u32,
    pub root_value: f32,
    pub playouts: u32,
    pub lines: Vec<CandidateLine>,
}

/// The search: one tree, one evaluator, one immutable config.
pub struct Search<E: Evaluator> {
    cfg: SearchConfig,
    evaluator: E,
    root: Box<Node>,
    root_state: Position,
    stop: Arc<AtomicBool>,
    counters: Counters,
    stats: SearchStats,
}

impl<E: Evaluator> std::fmt::Debug for Search<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Search")
            .field("cfg", &self.cfg)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<E: Evaluator> Search<E> {
    pub fn new(cfg: SearchConfig, evaluator: E, root_state: Position) -> Result<Self, SearchError> {
        cfg.validate()
            .map_err(|msg| SearchError::InvalidConfig { msg })?;
        Ok(Search {
            cfg,
            evaluator,
            root: Box::new(Node::root()),
            root_state,
            stop: Arc::new(AtomicBool::new(false)),
            counters: Counters::default(),
            stats: SearchStats::default(),
        })
    }

    pub fn cfg(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_state(&self) -> &Position {
        &self.root_state
    }

    /// Stats of the most recent think/ponder.
    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Discard the tree and start over from `pos`.
    pub fn reset(&mut self, pos: Position) {
        self.root = Box::new(Node::root());
        self.root_state = pos;
        self.stats = SearchStats::default();
    }

    /// A real move was played: advance the root, keeping the played
    /// subtree and discarding its siblings.
    pub fn advance(&mut self, mv: Move) -> Result<(), SearchError> {
        self.root_state.play(mv)?;
        self.root = match self.root.take_child(mv) {
            Some(subtree) => subtree,
            None => Box::new(Node::root()),
        };
        Ok(())
    }

    /// Bounded search that must return a move.
    ///
    /// Runs the worker pool until a budget is exhausted or the stop handle
    /// fires, then picks from root statistics. A move is always owed: with
    /// zero completed playouts the highest-prior legal child is returned,
    /// and a childless root passes.
    pub fn think(&mut self, budget: ThinkBudget) -> Result<Move, SearchError> {
        if self.root_state.is_terminal() {
            return Ok(Move::Pass);
        }
        let started = Instant::now();
        self.begin_run()?;
        let limits = Limits {
            max_playouts: budget.playouts.unwrap_or(self.cfg.max_playouts),
            max_visits: budget.visits.unwrap_or(self.cfg.max_visits),
            deadline: budget
                .time
                .or(self.cfg.move_time_ms.map(Duration::from_millis))
                .map(|d| started + d),
        };
        self.run_workers(&limits)?;
        self.finish_run(started);
        Ok(self.pick_best())
    }

    /// Unbounded search while waiting on the opponent; runs until the stop
    /// handle fires (or the evaluator fails).
    pub fn ponder(&mut self) -> Result<(), SearchError> {
        if self.root_state.is_terminal() {
            return Ok(());
        }
        let started = Instant::now();
        self.begin_run()?;
        let limits = Limits {
            max_playouts: u32::MAX,
            max_visits: self.cfg.max_visits,
            deadline: None,
        };
        self.run_workers(&limits)?;
        self.finish_run(started);
        Ok(())
    }

    fn begin_run(&mut self) -> Result<(), SearchError> {
        self.stop.store(false, Ordering::Relaxed);
        self.counters.reset();
        if !self.root.is_expanded() {
            let expanded = self
                .root
                .create_children(&self.evaluator, &self.root_state, &self.cfg)?;
            if expanded.is_some() && self.cfg.dirichlet_epsilon > 0.0 {
                let mut rng = ChaCha8Rng::seed_from_u64(self.cfg.seed ^ SEED_STRIDE);
                self.root
                    .apply_dirichlet_noise(self.cfg.dirichlet_alpha, self.cfg.dirichlet_epsilon, &mut rng);
            }
        }
        Ok(())
    }

    fn finish_run(&mut self, started: Instant) {
        self.stats = SearchStats {
            playouts: self.counters.playouts.load(Ordering::Relaxed),
            collisions: self.counters.collisions.load(Ordering::Relaxed),
            terminal_playouts: self.counters.terminals.load(Ordering::Relaxed),
            root_visits: self.root.visits(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
    }

    fn run_workers(&self, limits: &Limits) -> Result<(), SearchError> {
        let first_error: Mutex<Option<SearchError>> = Mutex::new(None);
        thread::scope(|scope| {
            for worker in 0..self.cfg.workers {
                let first_error = &first_error;
                scope.spawn(move || {
                    let seed = self.cfg.seed ^ (worker as u64 + 1).wrapping_mul(SEED_STRIDE);
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    loop {
                        // Stop conditions are observed cooperatively here;
                        // a playout in flight is never interrupted.
                        if self.should_stop(limits) {
                            break;
                        }
                        let mut pos = self.root_state.clone();
                        match self.playout(&mut pos, &self.root, true, &mut rng) {
                            Ok(Some(_)) => {
                                self.counters.playouts.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(None) => {
                                self.counters.collisions.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                let mut slot =
                                    first_error.lock().unwrap_or_else(|p| p.into_inner());
                                slot.get_or_insert(err);
                                self.stop.store(true, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                });
            }
        });
        match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn should_stop(&self, limits: &Limits) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        if self.counters.playouts.load(Ordering::Relaxed) >= limits.max_playouts {
            return true;
        }
        if self.root.visits() >= limits.max_visits {
            return true;
        }
        if let Some(deadline) = limits.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }

    /// One playout: descend to the first non-expanded node, obtain an
    /// evaluation (network on fresh expansion, rules-engine score on a
    /// terminal or sink), then back it up along the unwind. Virtual loss
    /// covers the node for the duration of the visit. Returns `Ok(None)`
    /// when the playout lost an expansion race and produced no value.
    fn playout<R: Rng>(
        &self,
        pos: &mut Position,
        node: &Node,
        is_root: bool,
        rng: &mut R,
    ) -> Result<Option<f32>, SearchError> {
        node.apply_virtual_loss(self.cfg.virtual_loss);
        let result = self.playout_inner(pos, node, is_root, rng);
        if let Ok(Some(value)) = &result {
            node.update(*value);
        }
        node.undo_virtual_loss(self.cfg.virtual_loss);
        result
    }

    fn playout_inner<R: Rng>(
        &self,
        pos: &mut Position,
        node: &Node,
        is_root: bool,
        rng: &mut R,
    ) -> Result<Option<f32>, SearchError> {
        if !node.is_expanded() {
            if pos.is_terminal() {
                self.counters.terminals.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(terminal_value(pos)));
            }
            return match node.create_children(&self.evaluator, pos, &self.cfg)? {
                Some(net_eval) => Ok(Some(net_eval)),
                // Another worker holds the claim; pick a different branch
                // next playout instead of blocking.
                None => Ok(None),
            };
        }

        match node.select_child(pos.to_move(), is_root, &self.cfg, rng) {
            Some(edge) => {
                let child = edge.inflate();
                pos.play(edge.mv())?;
                self.playout(pos, child, false, rng)
            }
            None => {
                // Expanded with nothing selectable: a sink. Its terminal
                // value stays authoritative.
                self.counters.terminals.fetch_add(1, Ordering::Relaxed);
                Ok(Some(terminal_value(pos)))
            }
        }
    }

    /// Final move from root statistics (visits, then LCB, then prior).
    fn pick_best(&self) -> Move {
        let to_move = self.root_state.to_move();
        let Some(best) = self.root.best_child(to_move, self.cfg.lcb_min_visits) else {
            return Move::Pass;
        };
        if self.cfg.resign_threshold > 0.0 {
            if let Some(node) = best.get() {
                if node.visits() > 0 && node.raw_eval(to_move, 0) < self.cfg.resign_threshold {
                    return Move::Resign;
                }
            }
        }
        best.mv()
    }

    /// Most robust line from the root, following visited children only.
    pub fn principal_variation(&self, max_len: usize) -> Vec<Move> {
        let mut pv = Vec::new();
        let mut node: &Node = &self.root;
        let mut color = self.root_state.to_move();
        while pv.len() < max_len {
            let Some(edge) = node.best_child(color, self.cfg.lcb_min_visits) else {
                break;
            };
            if edge.visits() == 0 {
                break;
            }
            pv.push(edge.mv());
            let Some(child) = edge.get() else {
                break;
            };
            node = child;
            color = color.opponent();
        }
        pv
    }

    /// Root report for diagnostic output, best candidates first.
    pub fn summary(&self, max_lines: usize) -> SearchSummary {
        let to_move = self.root_state.to_move();
        let root_visits = self.root.visits();
        let root_value = if root_visits > 0 {
            self.root.raw_eval(to_move, 0)
        } else {
            self.root.net_eval(to_move)
        };

        let mut lines = Vec::new();
        if let Some(children) = self.root.children() {
            let mut visited: Vec<_> = children.iter().filter(|e| e.visits() > 0).collect();
            visited.sort_by_key(|e| std::cmp::Reverse(e.visits()));
            for edge in visited.into_iter().take(max_lines) {
                let Some(node) = edge.get() else {
                    continue;
                };
                let pv = self
                    .line_from(node, to_move.opponent())
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                lines.push(CandidateLine {
                    mv: edge.mv().to_string(),
                    visits: edge.visits(),
                    winrate: node.raw_eval(to_move, 0),
                    lcb: node.eval_lcb(to_move, self.cfg.lcb_min_visits),
                    prior: edge.prior(),
                    pv: if pv.is_empty() {
                        edge.mv().to_string()
                    } else {
                        format!("{} {}", edge.mv(), pv)
                    },
                });
            }
        }

        SearchSummary {
            to_move: to_move.to_string(),
            root_visits,
            root_value,
            playouts: self.stats.playouts,
            lines,
        }
    }

    fn line_from(&self, start: &Node, mut color: Color) -> Vec<Move> {
        let mut line = Vec::new();
        let mut node = start;
        while line.len() < 8 {
            let Some(edge) = node.best_child(color, self.cfg.lcb_min_visits) else {
                break;
            };
            if edge.visits() == 0 {
                break;
            }
            line.push(edge.mv());
            let Some(child) = edge.get() else {
                break;
            };
            node = child;
            color = color.opponent();
        }
        line
    }
}

/// Value of a finished (or sunk) position, Black's perspective in [0, 1].
pub(crate) fn terminal_value(pos: &Position) -> f32 {
    let score = pos.final_score();
    if score > 0.0 {
        1.0
    } else if score < 0.0 {
        0.0
    } else {
        0.5
    }
}
