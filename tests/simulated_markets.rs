use approx::assert_relative_eq;
use blpsim::data::MarketRecord;
use blpsim::demand::shares;
use blpsim::integration::{seeded_rng, TasteDraws};
use blpsim::{
    BlpConfig, BlpData, BlpSimulator, CostFunction, DemandParameters, IvLogitConfig,
    IvLogitSimulator,
};
use nalgebra::{DMatrix, DVector};

fn blp_config(markets: usize) -> BlpConfig {
    let demand = DemandParameters::new(
        DVector::from_vec(vec![-1.0, 1.0, -0.5]),
        DVector::from_vec(vec![0.5, 0.5, 0.5]),
    )
    .unwrap();
    BlpConfig::new(3, markets, demand, DVector::from_vec(vec![0.4, 0.2]), 300)
        .with_var_xi(0.3)
        .with_var_omega(0.1)
        .with_firm_ids(vec![1, 1, 2])
}

fn iv_config(markets: usize, rho: f64) -> IvLogitConfig {
    let demand = DemandParameters::new(
        DVector::from_vec(vec![1.0, -0.5]),
        DVector::from_vec(vec![0.3, 0.3]),
    )
    .unwrap();
    let first_stage = vec![
        DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0]),
        DMatrix::from_row_slice(2, 2, &[0.2, 0.3, 1.0, -0.4]),
    ];
    IvLogitConfig::new(markets, demand, first_stage, rho, 20)
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    cov / (var_a * var_b).sqrt()
}

#[test]
fn simulated_shares_are_valid_probabilities() {
    let blp = BlpSimulator::new(blp_config(20)).unwrap();
    let blp_data = blp.simulate(&mut seeded_rng(1)).unwrap();
    for market in blp_data.markets() {
        assert!(market.shares.iter().all(|s| *s >= 0.0));
        assert!(market.shares.sum() < 1.0);
    }

    let iv = IvLogitSimulator::new(iv_config(50, 0.5)).unwrap();
    let iv_data = iv.simulate(&mut seeded_rng(1)).unwrap();
    for market in iv_data.markets() {
        assert!(market.shares().iter().all(|s| *s >= 0.0));
        assert!(market.shares().sum() < 1.0);
    }
}

/// Monte Carlo error shrinks with the number of simulated consumers.
#[test]
fn more_draws_reduce_share_variance() {
    let delta = DVector::from_vec(vec![0.5, -0.2, 0.1]);
    let sigma = DVector::from_vec(vec![1.0, 1.5]);
    let x = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.5, -1.0, 0.3, 1.2]);

    let spread = |draw_count: usize| {
        let values: Vec<f64> = (0..30)
            .map(|seed| {
                let draws = TasteDraws::standard_normal(&mut seeded_rng(seed), 2, draw_count).unwrap();
                shares(&delta, &sigma, &x, &draws).unwrap()[0]
            })
            .collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    };

    let coarse = spread(20);
    let fine = spread(2_000);
    assert!(fine < coarse, "variance with 2000 draws ({fine}) not below 20 draws ({coarse})");
}

#[test]
fn every_simulated_consumer_dislikes_price() {
    let config = blp_config(15);
    let beta0 = config.demand.beta[0];
    let sigma0 = config.demand.sigma[0];
    let data = BlpSimulator::new(config).unwrap().simulate(&mut seeded_rng(77)).unwrap();
    for market in data.markets() {
        let alphas = market.draws.price_coefficients(beta0, sigma0);
        assert!(alphas.iter().all(|alpha| *alpha < 0.0));
        assert!(market.draws.nodes().row(0).iter().all(|nu| beta0 + sigma0 * nu < 0.0));
    }
}

/// The demand shock loads on the common endogenous component with correlation ρ.
#[test]
fn demand_shock_correlation_approaches_rho() {
    let rho = 0.6;
    let data = IvLogitSimulator::new(iv_config(20_000, rho))
        .unwrap()
        .simulate(&mut seeded_rng(12))
        .unwrap();

    let endogenous: Vec<f64> = data.markets().iter().map(|m| m.endogenous[0]).collect();
    for j in 0..2 {
        let xi: Vec<f64> = data.markets().iter().map(|m| m.xi[j]).collect();
        let empirical = correlation(&xi, &endogenous);
        assert!((empirical - rho).abs() < 0.03, "product {j}: corr {empirical}");
    }
}

#[test]
fn linear_costs_feed_the_supply_side() {
    let config = blp_config(5)
        .with_cost_function(CostFunction::Linear)
        .with_var_omega(0.0);
    let data = BlpSimulator::new(config.clone()).unwrap().simulate(&mut seeded_rng(9)).unwrap();
    for market in data.markets() {
        let expected = market.cost_shifters.tr_mul(&config.gamma);
        assert_eq!(market.marginal_costs, expected);
        assert!(market.profits().iter().all(|profit| *profit > 0.0));
    }
}

#[test]
fn simulated_datasets_persist_as_json() {
    let data = BlpSimulator::new(blp_config(3)).unwrap().simulate(&mut seeded_rng(4)).unwrap();
    let json = serde_json::to_string(&data).unwrap();
    let restored: BlpData = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.market_count(), 3);
    for (left, right) in data.markets().iter().zip(restored.markets()) {
        assert_relative_eq!(left.prices, right.prices, max_relative = 1e-14);
        assert_eq!(left.equilibrium.iterations, right.equilibrium.iterations);
        assert_eq!(left.equilibrium.converged, right.equilibrium.converged);
    }
}

#[test]
fn product_table_stacks_blp_markets() {
    let data = BlpSimulator::new(blp_config(4)).unwrap().simulate(&mut seeded_rng(6)).unwrap();
    let table = data.product_table().unwrap();

    assert_eq!(table.product_count(), 12);
    assert_eq!(table.characteristics.ncols(), 3);
    assert_eq!(table.instruments.ncols(), 2 + 3 * 2);
    let range = table.market_range(2);
    assert_eq!(range, 6..9);
    assert_eq!(table.characteristics[(7, 0)], data.markets()[2].prices[1]);
    assert_eq!(data.share_matrix().unwrap().shape(), (3, 4));
}
