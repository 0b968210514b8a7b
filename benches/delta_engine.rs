//! Delta engine benchmarks: diff/apply/merge cost on game-state-shaped
//! values of increasing size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use parlor_server::delta::{apply, diff, merge};
use serde_json::{json, Value};

/// Build a state resembling a busy room: N players with scores and a
/// nested game object.
fn game_state(players: usize, round: u32) -> Value {
    let scores: serde_json::Map<String, Value> = (0..players)
        .map(|i| (format!("player-{i}"), json!(i as u32 * 10 + round)))
        .collect();
    let answered: Vec<String> = (0..players / 2).map(|i| format!("player-{i}")).collect();
    json!({
        "lifecycle": "playing",
        "round": round,
        "scores": scores,
        "game": {
            "game": "trivia",
            "phase": "asking",
            "round": round,
            "answered": answered,
            "question": {
                "prompt": "Which planet has the most moons?",
                "choices": ["Earth", "Saturn", "Mars", "Venus"],
            },
        },
    })
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for players in [8, 50, 100] {
        let prev = game_state(players, 1);
        let next = game_state(players, 2);
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, _| {
            b.iter(|| diff(&prev, &next));
        });
    }
    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    for players in [8, 50, 100] {
        let prev = game_state(players, 1);
        let next = game_state(players, 2);
        let delta = diff(&prev, &next);
        group.bench_with_input(BenchmarkId::from_parameter(players), &players, |b, _| {
            b.iter(|| apply(&prev, &delta));
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let base = game_state(50, 1);
    let mid = game_state(50, 2);
    let last = game_state(50, 3);
    let first = diff(&base, &mid);
    let second = diff(&mid, &last);
    c.bench_function("merge/50", |b| {
        b.iter(|| merge(&first, &second));
    });
}

criterion_group!(benches, bench_diff, bench_apply, bench_merge);
criterion_main!(benches);
