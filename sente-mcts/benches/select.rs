use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sente_core::{Color, Position};
use sente_mcts::{Search, SearchConfig, ThinkBudget, UniformEvaluator};

/// Warm a tree so the root has a representative spread of visited and
/// handle-only children.
fn warmed_search() -> Search<UniformEvaluator> {
    let cfg = SearchConfig {
        workers: 1,
        seed: 17,
        ..SearchConfig::default()
    };
    let mut search = Search::new(cfg, UniformEvaluator, Position::new(19, 7.5)).unwrap();
    search.think(ThinkBudget::playouts(512)).unwrap();
    search
}

fn bench_select_child(c: &mut Criterion) {
    let search = warmed_search();
    let cfg = *search.cfg();
    let root = search.root();
    let mut rng = ChaCha8Rng::seed_from_u64(17);

    c.bench_function("select_child_19x19_root", |b| {
        b.iter(|| {
            black_box(root.select_child(
                black_box(Color::Black),
                black_box(true),
                &cfg,
                &mut rng,
            ))
        })
    });
}

fn bench_short_think(c: &mut Criterion) {
    c.bench_function("think_9x9_64_playouts", |b| {
        b.iter(|| {
            let cfg = SearchConfig {
                workers: 1,
                seed: 5,
                ..SearchConfig::default()
            };
            let mut search =
                Search::new(cfg, UniformEvaluator, Position::new(9, 7.5)).unwrap();
            black_box(search.think(ThinkBudget::playouts(64)).unwrap())
        })
    });
}

criterion_group!(benches, bench_select_child, bench_short_think);
criterion_main!(benches);
