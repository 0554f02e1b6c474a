use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use treeboost::booster::GBTree;
use treeboost::data::{BoosterInfo, Entry, FeatureStore, GradPair};
use treeboost::grower::TreeGrower;
use treeboost::objective::{LogLoss, ObjectiveFunction};
use treeboost::tree::Tree;

const ROWS: usize = 100_000;
const COLS: u32 = 5;

fn synthetic(rows: usize) -> (FeatureStore, Vec<f64>, BoosterInfo) {
    let mut rng = StdRng::seed_from_u64(0);
    let mut store = FeatureStore::new();
    let mut y = Vec::with_capacity(rows);
    let mut row = Vec::with_capacity(COLS as usize);
    for _ in 0..rows {
        row.clear();
        let mut signal = 0.0;
        for fid in 0..COLS {
            // roughly a third of the values missing
            if rng.gen::<f64>() < 0.66 {
                let v: f64 = rng.gen_range(-1.0..1.0);
                signal += v;
                row.push(Entry::new(fid, v));
            }
        }
        store.push_row(&row);
        y.push(if signal > 0.0 { 1.0 } else { 0.0 });
    }
    store.build_col_access(1.0, &mut rng);
    let info = BoosterInfo::new(store.num_row(), store.num_col());
    (store, y, info)
}

pub fn tree_benchmarks(c: &mut Criterion) {
    let (store, y, info) = synthetic(ROWS);
    let yhat = vec![0.0; y.len()];
    let gpair = LogLoss::gradients(&y, &yhat);

    let mut grower = TreeGrower::default();
    grower.set_param("max_depth", "5").unwrap();

    c.bench_function("grow single tree", |b| {
        b.iter(|| {
            let mut trees = vec![Tree::new(1)];
            grower
                .update(black_box(&gpair), &store, &info, &mut trees)
                .unwrap();
            trees
        })
    });

    let mut booster = GBTree::new();
    booster.set_param("num_pbuffer", &ROWS.to_string()).unwrap();
    booster.set_param("max_depth", "5").unwrap();
    booster.init_model();
    for _ in 0..10 {
        let yhat = booster.predict(&store, 0, &info, 0).unwrap();
        let mut gpair: Vec<GradPair> = LogLoss::gradients(&y, &yhat);
        booster.do_boost(&store, &info, &mut gpair).unwrap();
    }

    c.bench_function("predict 10 trees uncached", |b| {
        b.iter(|| booster.predict(black_box(&store), -1, &info, 0).unwrap())
    });

    c.bench_function("predict 10 trees cached", |b| {
        b.iter(|| booster.predict(black_box(&store), 0, &info, 0).unwrap())
    });
}

criterion_group! {
    name=benches;
    config = Criterion::default().sample_size(10);
    targets=tree_benchmarks
}
criterion_main!(benches);
