//! Tree node: expansion protocol, lazy child handles, selection, statistics.
//!
//! A `Node` is the unit of concurrency. Workers share nodes immutably; all
//! mutable state is atomic, and the only strictly ordered operation is the
//! per-node expansion claim. Once a node publishes `Expanded`, readers
//! proceed lock-free.

use crate::config::SearchConfig;
use crate::eval::{EvalError, Evaluator, NetOutput};
use crate::stats::{t_quantile, AtomicF32, AtomicF64};
use rand::Rng;
use sente_core::{Color, Move, Position};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::OnceLock;

/// Returned by `eval_lcb` below the minimum-visit threshold, so that
/// rarely-visited children never win a robustness comparison. The visit
/// count is added so the sentinel still orders among such children.
pub const LCB_SENTINEL: f32 = -1e6;

/// Network evaluation at or above which a post-pass pass candidate is
/// suspect: the net thinks the game is won, so ending it must be checked
/// against the actual board count.
const PASS_SUPPRESS_EVAL: f32 = 0.75;

/// Pass suppression only applies while this many alternatives exist.
const PASS_SUPPRESS_MIN_MOVES: usize = 5;

/// Expansion claim state machine. Transitions: `Initial -> Expanding ->
/// Expanded`, or `Expanding -> Initial` on a cancelled attempt. Never
/// backward from `Expanded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExpandState {
    Initial = 0,
    Expanding = 1,
    Expanded = 2,
}

impl ExpandState {
    fn from_u8(v: u8) -> ExpandState {
        match v {
            0 => ExpandState::Initial,
            1 => ExpandState::Expanding,
            _ => ExpandState::Expanded,
        }
    }
}

/// Whether selection may consider this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    Active = 0,
    Pruned = 1,
    Invalid = 2,
}

/// A single tree vertex: the move that reached it, the evaluator's prior,
/// and the running statistics accumulated by backups through it.
///
/// `value_sum` and `net_eval` are kept from Black's perspective so readers
/// can flip per side-to-move without ambiguity.
pub struct Node {
    mv: Move,
    prior: f32,
    visits: AtomicU32,
    value_sum: AtomicF64,
    squared_diff_sum: AtomicF64,
    virtual_loss: AtomicU32,
    net_eval: AtomicF32,
    expand_state: AtomicU8,
    status: AtomicU8,
    /// Lowest widening ratio applied so far when selecting among this
    /// node's children; 2.0 until children are linked.
    min_ratio_children: AtomicF32,
    children: OnceLock<Vec<Edge>>,
}

/// Lazy handle to a child: the move and prior are always present, the full
/// `Node` materializes on first selection. The publish-once cell guarantees
/// a single caller performs the promotion.
pub struct Edge {
    mv: Move,
    prior: f32,
    node: OnceLock<Box<Node>>,
}

impl Edge {
    fn new(mv: Move, prior: f32) -> Edge {
        Edge {
            mv,
            prior,
            node: OnceLock::new(),
        }
    }

    pub fn mv(&self) -> Move {
        self.mv
    }

    pub fn prior(&self) -> f32 {
        self.prior
    }

    /// The inflated node, if this handle has been promoted.
    pub fn get(&self) -> Option<&Node> {
        self.node.get().map(Box::as_ref)
    }

    /// Promote to a full node (at most one caller allocates).
    pub fn inflate(&self) -> &Node {
        self.node.get_or_init(|| Box::new(Node::new(self.mv, self.prior)))
    }

    pub fn visits(&self) -> u32 {
        self.get().map_or(0, Node::visits)
    }

    /// Uninflated handles are implicitly active.
    pub fn is_active(&self) -> bool {
        self.get().map_or(true, Node::is_active)
    }

    pub fn is_valid(&self) -> bool {
        self.get().map_or(true, Node::is_valid)
    }

    fn is_expanding(&self) -> bool {
        self.get()
            .map_or(false, |n| n.expand_state() == ExpandState::Expanding)
    }
}

impl Node {
    pub fn new(mv: Move, prior: f32) -> Node {
        Node {
            mv,
            prior,
            visits: AtomicU32::new(0),
            value_sum: AtomicF64::new(0.0),
            squared_diff_sum: AtomicF64::new(0.0),
            virtual_loss: AtomicU32::new(0),
            net_eval: AtomicF32::new(0.0),
            expand_state: AtomicU8::new(ExpandState::Initial as u8),
            status: AtomicU8::new(NodeStatus::Active as u8),
            min_ratio_children: AtomicF32::new(2.0),
            children: OnceLock::new(),
        }
    }

    /// Root sentinel: not reached by any move.
    pub fn root() -> Node {
        Node::new(Move::None, 1.0)
    }

    pub fn mv(&self) -> Move {
        self.mv
    }

    pub fn prior(&self) -> f32 {
        self.prior
    }

    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn first_visit(&self) -> bool {
        self.visits() == 0
    }

    // --- status -----------------------------------------------------------

    pub fn status(&self) -> NodeStatus {
        match self.status.load(Ordering::Relaxed) {
            0 => NodeStatus::Active,
            1 => NodeStatus::Pruned,
            _ => NodeStatus::Invalid,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == NodeStatus::Active
    }

    pub fn is_valid(&self) -> bool {
        self.status() != NodeStatus::Invalid
    }

    /// Pruned nodes stay in the tree but are skipped by selection.
    /// Invalid nodes stay invalid.
    pub fn set_active(&self, active: bool) {
        if self.is_valid() {
            let status = if active {
                NodeStatus::Active
            } else {
                NodeStatus::Pruned
            };
            self.status.store(status as u8, Ordering::Relaxed);
        }
    }

    pub fn invalidate(&self) {
        self.status.store(NodeStatus::Invalid as u8, Ordering::Relaxed);
    }

    // --- expansion protocol ----------------------------------------------

    pub fn expand_state(&self) -> ExpandState {
        ExpandState::from_u8(self.expand_state.load(Ordering::Acquire))
    }

    pub fn is_expanded(&self) -> bool {
        self.expand_state() == ExpandState::Expanded
    }

    /// Claim the right to expand. Exactly one caller wins on a fresh node.
    pub fn acquire_expansion(&self) -> bool {
        self.expand_state
            .compare_exchange(
                ExpandState::Initial as u8,
                ExpandState::Expanding as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Publish the children to every reader.
    pub fn finish_expansion(&self) {
        let prev = self
            .expand_state
            .swap(ExpandState::Expanded as u8, Ordering::Release);
        debug_assert_eq!(prev, ExpandState::Expanding as u8);
    }

    /// Revert a claim that produced nothing.
    pub fn cancel_expansion(&self) {
        let prev = self
            .expand_state
            .swap(ExpandState::Initial as u8, Ordering::Release);
        debug_assert_eq!(prev, ExpandState::Expanding as u8);
    }

    /// Spin until the claiming worker publishes. Bounded by one evaluator
    /// call plus linking.
    pub fn wait_until_expanded(&self) {
        while self.expand_state() == ExpandState::Expanding {
            std::hint::spin_loop();
        }
    }

    // --- expansion --------------------------------------------------------

    /// Evaluate this position and link children.
    ///
    /// Returns `Ok(Some(net_eval))` (Black's perspective) if this call
    /// performed the expansion, `Ok(None)` if the position is terminal or
    /// another worker holds the claim. Evaluator failure propagates after
    /// the claim is released; it is fatal to the search.
    pub fn create_children(
        &self,
        evaluator: &dyn Evaluator,
        pos: &Position,
        cfg: &SearchConfig,
    ) -> Result<Option<f32>, EvalError> {
        // No successors in a final state: the node stays a leaf forever.
        if pos.passes() >= 2 {
            return Ok(None);
        }
        if !self.acquire_expansion() {
            return Ok(None);
        }

        let out = match evaluator.evaluate(pos) {
            Ok(out) => out,
            Err(err) => {
                self.cancel_expansion();
                return Err(err);
            }
        };
        if let Err(reason) = validate_output(&out) {
            self.cancel_expansion();
            return Err(EvalError::Malformed(reason));
        }

        let to_move = pos.to_move();
        let stm_eval = out.value;
        // The tree reports from Black's perspective.
        let net_eval = match to_move {
            Color::Black => stm_eval,
            Color::White => 1.0 - stm_eval,
        };
        self.net_eval.store(net_eval);

        let mut weighted: Vec<(f32, Move)> = Vec::new();
        for v in pos.vertices() {
            let mv = Move::Vertex(v);
            if pos.is_legal(to_move, mv) {
                let w = out.policy.get(&mv).copied().unwrap_or(0.0);
                weighted.push((w, mv));
            }
        }
        if pass_allowed(pos, stm_eval, weighted.len(), cfg.suppress_pass) {
            let w = out.policy.get(&Move::Pass).copied().unwrap_or(0.0);
            weighted.push((w, Move::Pass));
        }

        renormalize(&mut weighted);
        self.link_children(weighted);
        self.finish_expansion();
        Ok(Some(net_eval))
    }

    pub(crate) fn link_children(&self, mut weighted: Vec<(f32, Move)>) {
        // Best to worst, stable so equal weights keep enumeration order.
        weighted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(CmpOrdering::Equal));
        let edges: Vec<Edge> = weighted
            .into_iter()
            .map(|(w, mv)| Edge::new(mv, w))
            .collect();
        let already_linked = self.children.set(edges).is_err();
        debug_assert!(!already_linked, "children linked twice");
    }

    /// Linked children, best prior first. `None` until expanded.
    pub fn children(&self) -> Option<&[Edge]> {
        self.children.get().map(Vec::as_slice)
    }

    pub fn has_children(&self) -> bool {
        self.children().map_or(false, |c| !c.is_empty())
    }

    /// Children promoted to full nodes so far.
    pub fn materialized_children(&self) -> usize {
        self.children()
            .map_or(0, |c| c.iter().filter(|e| e.get().is_some()).count())
    }

    /// Widening threshold bookkeeping: the lowest ratio applied so far.
    pub fn min_ratio_children(&self) -> f32 {
        self.min_ratio_children.load()
    }

    // --- statistics -------------------------------------------------------

    /// Record a backed-up evaluation (Black's perspective).
    ///
    /// The three counters are individually atomic, not transactional as a
    /// group; the squared-diff term follows Welford's recurrence computed
    /// from before/after snapshots and converges despite interleavings.
    pub fn update(&self, eval: f32) {
        let old_sum = self.value_sum.load();
        let old_visits = self.visits.load(Ordering::Relaxed);
        let old_delta = if old_visits > 0 {
            eval - (old_sum / f64::from(old_visits)) as f32
        } else {
            0.0
        };
        self.visits.fetch_add(1, Ordering::Relaxed);
        self.value_sum.fetch_add(f64::from(eval));
        let new_delta = eval - ((old_sum + f64::from(eval)) / f64::from(old_visits + 1)) as f32;
        self.squared_diff_sum
            .fetch_add(f64::from(old_delta * new_delta));
    }

    pub fn apply_virtual_loss(&self, amount: u32) {
        self.virtual_loss.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn undo_virtual_loss(&self, amount: u32) {
        self.virtual_loss.fetch_sub(amount, Ordering::Relaxed);
    }

    pub fn virtual_loss(&self) -> u32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    /// Mean evaluation for `perspective`, counting `virtual_loss` pending
    /// traversals as losses for that perspective.
    pub fn raw_eval(&self, perspective: Color, virtual_loss: u32) -> f32 {
        let visits = self.visits() + virtual_loss;
        debug_assert!(visits > 0, "raw_eval on unvisited node");
        if visits == 0 {
            return 0.5;
        }
        let mut sum = self.value_sum.load();
        if perspective == Color::White {
            sum += f64::from(virtual_loss);
        }
        let mut eval = (sum / f64::from(visits)) as f32;
        if perspective == Color::White {
            eval = 1.0 - eval;
        }
        eval
    }

    /// Mean evaluation including this node's own in-flight virtual loss.
    pub fn eval(&self, perspective: Color) -> f32 {
        self.raw_eval(perspective, self.virtual_loss())
    }

    /// Cached network value for `perspective` (FPU baseline).
    pub fn net_eval(&self, perspective: Color) -> f32 {
        let e = self.net_eval.load();
        match perspective {
            Color::Black => e,
            Color::White => 1.0 - e,
        }
    }

    /// Sample variance of backed-up evaluations.
    pub fn eval_variance(&self, default_var: f32) -> f32 {
        let visits = self.visits();
        if visits > 1 {
            (self.squared_diff_sum.load() / f64::from(visits - 1)) as f32
        } else {
            default_var
        }
    }

    /// Lower confidence bound of the winrate for `perspective`, using a
    /// Student-t quantile at `visits - 1` degrees of freedom. Below
    /// `min_visits` the sentinel keeps this node out of any robustness
    /// comparison.
    pub fn eval_lcb(&self, perspective: Color, min_visits: u32) -> f32 {
        let visits = self.visits();
        let floor = min_visits.max(2);
        if visits < floor {
            return LCB_SENTINEL + visits as f32;
        }
        let mean = self.raw_eval(perspective, 0);
        let stddev = (self.eval_variance(1.0) / visits as f32).sqrt();
        mean - t_quantile(visits - 1) * stddev
    }

    // --- selection --------------------------------------------------------

    /// Widening ratio for this node's current visit count: starts at 1
    /// (only top-prior children considered) and shrinks toward the floor as
    /// visits accumulate.
    fn widening_ratio(&self, floor: f32) -> f32 {
        floor.max(1.0 / (1.0 + self.visits() as f32))
    }

    /// Children currently eligible for selection: already materialized, or
    /// with a prior above the widening threshold.
    pub fn eligible_children(&self, floor: f32) -> usize {
        let Some(children) = self.children() else {
            return 0;
        };
        let max_prior = children.iter().map(Edge::prior).fold(0.0f32, f32::max);
        let threshold = max_prior * self.widening_ratio(floor);
        children
            .iter()
            .filter(|e| e.is_active() && (e.get().is_some() || e.prior() >= threshold))
            .count()
    }

    /// PUCT selection over ACTIVE, widening-eligible children.
    ///
    /// `perspective` is the side to move at this node. A child currently
    /// being expanded by another worker is deprioritized rather than
    /// blocked on. Ties break uniformly with the caller's RNG. Returns
    /// `None` when no child is selectable (empty expansion or everything
    /// pruned): the caller treats this node as a sink.
    pub fn select_child<R: Rng>(
        &self,
        perspective: Color,
        is_root: bool,
        cfg: &SearchConfig,
        rng: &mut R,
    ) -> Option<&Edge> {
        self.wait_until_expanded();
        let children = self.children()?;
        if children.is_empty() {
            return None;
        }

        // Parent visits are counted over the children; this node's own
        // counter may lag behind concurrent backups.
        let mut parent_visits: u64 = 0;
        let mut total_visited_policy = 0.0f32;
        let mut max_prior = 0.0f32;
        for edge in children {
            max_prior = max_prior.max(edge.prior());
            if edge.is_valid() {
                let v = edge.visits();
                parent_visits += u64::from(v);
                if v > 0 {
                    total_visited_policy += edge.prior();
                }
            }
        }

        let numerator = (parent_visits as f32).sqrt();
        let base_reduction = if is_root {
            cfg.fpu_root_reduction
        } else {
            cfg.fpu_reduction
        };
        let fpu_reduction = base_reduction * total_visited_policy.sqrt();
        // Estimated eval for unvisited children: parent net eval, reduced.
        let fpu_eval = self.net_eval(perspective) - fpu_reduction;

        let ratio = self.widening_ratio(cfg.widening_ratio_floor);
        self.min_ratio_children.fetch_min(ratio);
        let threshold = max_prior * ratio;

        let mut best: Option<&Edge> = None;
        let mut best_value = f32::NEG_INFINITY;
        let mut ties = 0u32;
        for edge in children {
            if !edge.is_active() {
                continue;
            }
            if edge.prior() < threshold && edge.get().is_none() {
                // Below the widening threshold and not yet materialized.
                continue;
            }

            let winrate = if edge.is_expanding() {
                // Another worker holds the expansion claim; selecting this
                // child would stall on its spin wait.
                -1.0 - fpu_reduction
            } else {
                match edge.get() {
                    Some(node) if node.visits() > 0 => node.eval(perspective),
                    _ => fpu_eval,
                }
            };
            let denom = 1.0 + edge.visits() as f32;
            let puct = cfg.c_puct * edge.prior() * numerator / denom;
            let value = winrate + puct;

            if value > best_value {
                best_value = value;
                best = Some(edge);
                ties = 1;
            } else if value == best_value {
                ties += 1;
                if rng.gen_range(0..ties) == 0 {
                    best = Some(edge);
                }
            }
        }
        best
    }

    // --- final choice -----------------------------------------------------

    /// Best child for the final decision: visit count first, LCB as the
    /// tie-break, raw prior for never-visited children. Never the
    /// exploration-biased selection value.
    pub fn best_child(&self, perspective: Color, lcb_min_visits: u32) -> Option<&Edge> {
        let children = self.children()?;
        children
            .iter()
            .filter(|e| e.is_valid())
            .max_by(|a, b| choice_order(a, b, perspective, lcb_min_visits))
    }

    // --- tree maintenance -------------------------------------------------

    /// Detach and return the subtree reached by `mv`, if materialized.
    /// Used when a real move advances the root; the rest of the tree is
    /// dropped by the caller.
    pub fn take_child(&mut self, mv: Move) -> Option<Box<Node>> {
        let children = self.children.get_mut()?;
        children
            .iter_mut()
            .find(|e| e.mv == mv)
            .and_then(|e| e.node.take())
    }

    /// Mix Dirichlet noise into the child priors. Root-only, performed
    /// before workers start; priors are immutable once the search runs.
    pub(crate) fn apply_dirichlet_noise<R: Rng>(&mut self, alpha: f32, epsilon: f32, rng: &mut R) {
        if !(alpha.is_finite() && alpha > 0.0 && epsilon > 0.0 && epsilon <= 1.0) {
            return;
        }
        let Some(children) = self.children.get_mut() else {
            return;
        };
        if children.is_empty() {
            return;
        }
        use rand_distr::{Distribution, Gamma};
        let gamma = Gamma::new(f64::from(alpha), 1.0).expect("alpha > 0");
        let mut eta: Vec<f64> = children.iter().map(|_| gamma.sample(rng)).collect();
        let sum: f64 = eta.iter().sum();
        if !(sum.is_finite() && sum > 0.0) {
            return;
        }
        for e in eta.iter_mut() {
            *e /= sum;
        }
        for (edge, noise) in children.iter_mut().zip(eta) {
            edge.prior = (1.0 - epsilon) * edge.prior + epsilon * noise as f32;
        }
    }

    /// Nodes materialized in this subtree, root included. Diagnostic.
    pub fn count_nodes(&self) -> usize {
        let mut count = 1;
        if let Some(children) = self.children() {
            for edge in children {
                if let Some(node) = edge.get() {
                    count += node.count_nodes();
                }
            }
        }
        count
    }
}

/// Final-choice ordering (greater = better): visits, LCB, then prior.
fn choice_order(a: &Edge, b: &Edge, perspective: Color, lcb_min_visits: u32) -> CmpOrdering {
    let (va, vb) = (a.visits(), b.visits());
    if va != vb {
        return va.cmp(&vb);
    }
    if va == 0 {
        return a.prior().total_cmp(&b.prior());
    }
    match (a.get(), b.get()) {
        (Some(na), Some(nb)) => {
            let la = na.eval_lcb(perspective, lcb_min_visits);
            let lb = nb.eval_lcb(perspective, lcb_min_visits);
            if la != lb {
                return la.total_cmp(&lb);
            }
            na.raw_eval(perspective, 0).total_cmp(&nb.raw_eval(perspective, 0))
        }
        _ => CmpOrdering::Equal,
    }
}

/// Pass stays a candidate unless every suppression condition holds: the
/// opponent just passed, the net is confident for the side to move, enough
/// alternatives exist, and ending the game now loses on the board count.
/// Guards against two engines passing a won-looking game into a rules loss.
pub(crate) fn pass_allowed(
    pos: &Position,
    stm_eval: f32,
    other_moves: usize,
    suppress: bool,
) -> bool {
    if !suppress {
        return true;
    }
    if pos.last_move() != Move::Pass {
        return true;
    }
    if stm_eval < PASS_SUPPRESS_EVAL {
        return true;
    }
    if other_moves < PASS_SUPPRESS_MIN_MOVES {
        return true;
    }
    let relative_score = match pos.to_move() {
        Color::Black => pos.final_score(),
        Color::White => -pos.final_score(),
    };
    relative_score >= 0.0
}

/// Renormalize legal-move weights in place. Returns true when the legal
/// sum underflowed and the uniform fallback was used (fresh randomized
/// nets do this).
pub(crate) fn renormalize(weighted: &mut [(f32, Move)]) -> bool {
    let legal_sum: f32 = weighted.iter().map(|(w, _)| *w).sum();
    if legal_sum > f32::MIN_POSITIVE {
        for (w, _) in weighted.iter_mut() {
            *w /= legal_sum;
        }
        false
    } else {
        if !weighted.is_empty() {
            let uniform = 1.0 / weighted.len() as f32;
            for (w, _) in weighted.iter_mut() {
                *w = uniform;
            }
        }
        true
    }
}

fn validate_output(out: &NetOutput) -> Result<(), String> {
    if !out.value.is_finite() || !(0.0..=1.0).contains(&out.value) {
        return Err(format!("value {} outside [0, 1]", out.value));
    }
    for (mv, &w) in &out.policy {
        if !w.is_finite() || w < 0.0 {
            return Err(format!("weight {w} for move {mv}"));
        }
    }
    Ok(())
}

#[cfg(test)]
impl Node {
    /// Overwrite the statistics directly (test fixtures only).
    pub(crate) fn force_stats(&self, visits: u32, value_sum: f64, squared_diff_sum: f64) {
        self.visits.store(visits, Ordering::Relaxed);
        self.value_sum.store(value_sum);
        self.squared_diff_sum.store(squared_diff_sum);
    }
}
