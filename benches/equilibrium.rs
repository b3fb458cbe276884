use blpsim::integration::{seeded_rng, TasteDraws};
use blpsim::{equilibrium_prices, DemandParameters, EquilibriumOptions, Ownership};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{DMatrix, DVector};

fn bench_equilibrium_prices(c: &mut Criterion) {
    let demand = DemandParameters::new(
        DVector::from_vec(vec![-1.0, 1.0, 0.5]),
        DVector::from_vec(vec![0.5, 0.5, 0.3]),
    )
    .expect("matching parameters");
    let options = EquilibriumOptions::default();
    let mut group = c.benchmark_group("equilibrium_prices");

    for products in [5usize, 20] {
        let mut rng = seeded_rng(products as u64);
        let draws = TasteDraws::with_negative_price_coefficient(&mut rng, 3, 1_000, -1.0, 0.5)
            .expect("taste draws");
        let x = DMatrix::from_fn(2, products, |k, j| ((k + 1) * (j + 1)) as f64 / products as f64);
        let mc = DVector::from_element(products, 1.0);
        let xi = DVector::zeros(products);
        let firm_ids: Vec<usize> = (0..products).map(|j| j % 3).collect();
        let ownership = Ownership::from_firm_ids(&firm_ids);

        group.bench_with_input(BenchmarkId::from_parameter(products), &products, |b, _| {
            b.iter(|| {
                equilibrium_prices(
                    black_box(&mc),
                    &demand,
                    &xi,
                    &x,
                    &draws,
                    &ownership,
                    &options,
                )
                .expect("solved prices")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_equilibrium_prices);
criterion_main!(benches);
