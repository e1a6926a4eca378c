use criterion::{black_box, criterion_group, criterion_main, Criterion};
use peatflux::booster::binning::bin_matrix;
use peatflux::booster::config::{BoosterConfig, Hyperparameters};
use peatflux::booster::GradientBooster;
use peatflux::cross_validation::{cross_val_scores, KFold};
use peatflux::data::{Dataset, Matrix};
use peatflux::metric::Metric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn synthetic(rows: usize, cols: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(0);
    let data: Vec<f64> = (0..rows * cols).map(|_| rng.gen::<f64>()).collect();
    let y = (0..rows)
        .map(|r| 3.0 * data[r] - 2.0 * data[rows + r] + 0.1 * rng.gen::<f64>())
        .collect();
    Dataset::new(data, y, (0..cols).map(|c| format!("f{}", c)).collect())
}

pub fn booster_benchmarks(c: &mut Criterion) {
    let ds = synthetic(5000, 8);
    let data = ds.matrix();
    let cfg = BoosterConfig::from(Hyperparameters::new(0.1, 6, 100, 0.7)).with_seed(0);

    c.bench_function("bin_matrix", |b| b.iter(|| bin_matrix(black_box(&data), 256).unwrap()));

    let mut booster_train = c.benchmark_group("train_booster");
    booster_train.warm_up_time(Duration::from_secs(5));
    booster_train.sample_size(20);
    booster_train.bench_function("train_booster_100_trees", |b| {
        b.iter(|| {
            let mut booster = GradientBooster::new(cfg.clone()).unwrap();
            booster.fit(black_box(&data), black_box(&ds.y)).unwrap();
        })
    });
    let template = GradientBooster::new(BoosterConfig::from(Hyperparameters::new(0.1, 4, 50, 1.0))).unwrap();
    booster_train.bench_function("cross_val_scores_10_fold", |b| {
        b.iter(|| cross_val_scores(black_box(&template), black_box(&ds), KFold::new(10), Metric::R2).unwrap())
    });
    booster_train.finish();

    let mut booster = GradientBooster::new(cfg).unwrap();
    booster.fit(&data, &ds.y).unwrap();
    let predict_data = Matrix::new(&ds.data, ds.rows, ds.cols);
    c.bench_function("Predict Booster", |b| b.iter(|| booster.predict(black_box(&predict_data))));
    c.bench_function("Predict Contributions", |b| {
        b.iter(|| booster.predict_contributions(black_box(&predict_data)))
    });
}

criterion_group!(benches, booster_benchmarks);
criterion_main!(benches);
