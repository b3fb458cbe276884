//! Market simulators.
//!
//! Every random primitive is drawn from the caller's generator, market by market,
//! before any shares or prices are computed. The per-market numerical work only
//! reads those primitives, so it can run on the rayon pool without changing results.

use log::debug;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rayon::prelude::*;

use crate::data::{BlpData, BlpMarket, IvLogitData, IvLogitMarket, SimulatedMarkets};
use crate::demand::{mean_utility, shares, with_price_row};
use crate::error::{BlpError, Result};
use crate::integration::{standard_normal_matrix, standard_uniform_matrix, TasteDraws};
use crate::options::{BlpConfig, IvLogitConfig};
use crate::supply::{equilibrium_prices, Ownership};

/// Demand-only simulator with instruments and an endogenous common component.
#[derive(Clone, Debug)]
pub struct IvLogitSimulator {
    config: IvLogitConfig,
}

struct IvLogitPrimitives {
    instruments: DMatrix<f64>,
    endogenous: DVector<f64>,
    noise: DVector<f64>,
    draws: TasteDraws,
}

impl IvLogitSimulator {
    /// Validates every dimension and parameter of the configuration.
    pub fn new(config: IvLogitConfig) -> Result<Self> {
        check_counts(config.markets, config.draws)?;
        config.demand.validate()?;
        let k = config.demand.dimension();
        let products = config.products();
        if products == 0 {
            return Err(BlpError::dimension_mismatch("first-stage products", 1, 0));
        }
        let l = config.instruments();
        if l == 0 {
            return Err(BlpError::dimension_mismatch("instrument count", 1, 0));
        }
        for pi in &config.first_stage {
            if pi.nrows() != l {
                return Err(BlpError::dimension_mismatch("first-stage rows", l, pi.nrows()));
            }
            if pi.ncols() != k {
                return Err(BlpError::dimension_mismatch("first-stage columns", k, pi.ncols()));
            }
        }
        if !config.rho.is_finite() || config.rho.abs() > 1.0 {
            return Err(BlpError::invalid_parameter(
                "rho",
                format!("correlation must lie in [-1, 1], found {}", config.rho),
            ));
        }
        check_variance("var_xi", config.var_xi)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IvLogitConfig {
        &self.config
    }

    /// Draws `T` markets and computes their simulated shares.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<IvLogitData> {
        let config = &self.config;
        let k = config.demand.dimension();
        let products = config.products();
        let l = config.instruments();

        let mut primitives = Vec::with_capacity(config.markets);
        for _ in 0..config.markets {
            primitives.push(IvLogitPrimitives {
                instruments: standard_normal_matrix(rng, l, products),
                endogenous: standard_normal_matrix(rng, k, 1).column(0).into_owned(),
                noise: standard_normal_matrix(rng, products, 1).column(0).into_owned(),
                draws: TasteDraws::standard_normal(rng, k, config.draws)?,
            });
        }

        let markets = map_markets(primitives, config.parallel, |p| self.market(p))?;
        debug!("simulated {} IV logit markets with {} products", markets.len(), products);
        Ok(SimulatedMarkets::new(markets))
    }

    fn market(&self, primitives: IvLogitPrimitives) -> Result<IvLogitMarket> {
        let config = &self.config;
        let k = config.demand.dimension();
        let products = config.products();

        let mut characteristics = DMatrix::zeros(k, products);
        for (j, pi) in config.first_stage.iter().enumerate() {
            let column = pi.tr_mul(&primitives.instruments.column(j)) + &primitives.endogenous;
            characteristics.set_column(j, &column);
        }

        let rho = config.rho;
        let scale = config.var_xi.sqrt();
        let common = rho * primitives.endogenous[0];
        let idiosyncratic = (1.0 - rho * rho).sqrt();
        let xi = primitives
            .noise
            .map(|e| scale * (common + idiosyncratic * e));

        let delta = mean_utility(&config.demand.beta, &characteristics, &xi)?;
        let shares = shares(&delta, &config.demand.sigma, &characteristics, &primitives.draws)?;

        Ok(IvLogitMarket {
            characteristics,
            instruments: primitives.instruments,
            endogenous: primitives.endogenous,
            xi,
            draws: primitives.draws,
            shares,
        })
    }
}

/// Simulator of full BLP markets: random-coefficients demand with equilibrium prices.
#[derive(Clone, Debug)]
pub struct BlpSimulator {
    config: BlpConfig,
    ownership: Ownership,
}

struct BlpPrimitives {
    characteristics: DMatrix<f64>,
    cost_shifters: DMatrix<f64>,
    xi: DVector<f64>,
    omega: DVector<f64>,
    draws: TasteDraws,
}

impl BlpSimulator {
    /// Validates every dimension and parameter of the configuration.
    pub fn new(config: BlpConfig) -> Result<Self> {
        check_counts(config.markets, config.draws)?;
        config.demand.validate()?;
        if config.products == 0 {
            return Err(BlpError::dimension_mismatch("products per market", 1, 0));
        }
        if config.gamma.is_empty() {
            return Err(BlpError::dimension_mismatch("gamma length", 1, 0));
        }
        if let Some(ids) = &config.firm_ids {
            if ids.len() != config.products {
                return Err(BlpError::dimension_mismatch("firm ids", config.products, ids.len()));
            }
        }
        let beta0 = config.demand.beta[0];
        let sigma0 = config.demand.sigma[0];
        if sigma0 == 0.0 && beta0 >= 0.0 {
            return Err(BlpError::invalid_parameter(
                "beta",
                format!("price coefficient must be negative without heterogeneity, found {beta0}"),
            ));
        }
        check_variance("var_xi", config.var_xi)?;
        check_variance("var_omega", config.var_omega)?;

        let ownership = config.ownership();
        Ok(Self { config, ownership })
    }

    pub fn config(&self) -> &BlpConfig {
        &self.config
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// Draws `T` markets, solves each for equilibrium prices and computes the resulting shares.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<BlpData> {
        let config = &self.config;
        let k = config.demand.dimension();
        let l = config.gamma.len();
        let products = config.products;
        let xi_scale = config.var_xi.sqrt();
        let omega_scale = config.var_omega.sqrt();

        let mut primitives = Vec::with_capacity(config.markets);
        for _ in 0..config.markets {
            primitives.push(BlpPrimitives {
                characteristics: standard_uniform_matrix(rng, k - 1, products),
                cost_shifters: standard_uniform_matrix(rng, l, products),
                xi: standard_normal_matrix(rng, products, 1).column(0) * xi_scale,
                omega: standard_normal_matrix(rng, products, 1).column(0) * omega_scale,
                draws: TasteDraws::with_negative_price_coefficient(
                    rng,
                    k,
                    config.draws,
                    config.demand.beta[0],
                    config.demand.sigma[0],
                )?,
            });
        }

        let markets = map_markets(primitives, config.parallel, |p| self.market(p))?;
        let unconverged = markets.iter().filter(|m| !m.equilibrium.converged).count();
        debug!(
            "simulated {} BLP markets with {} products ({} without converged prices)",
            markets.len(),
            products,
            unconverged
        );
        Ok(SimulatedMarkets::new(markets))
    }

    fn market(&self, primitives: BlpPrimitives) -> Result<BlpMarket> {
        let config = &self.config;
        let marginal_costs = config.cost_function.marginal_costs(
            &primitives.cost_shifters,
            &config.gamma,
            &primitives.omega,
        )?;

        let solved = equilibrium_prices(
            &marginal_costs,
            &config.demand,
            &primitives.xi,
            &primitives.characteristics,
            &primitives.draws,
            &self.ownership,
            &config.equilibrium,
        )?;

        let characteristics = with_price_row(&solved.prices, &primitives.characteristics)?;
        let delta = mean_utility(&config.demand.beta, &characteristics, &primitives.xi)?;
        let shares = shares(&delta, &config.demand.sigma, &characteristics, &primitives.draws)?;

        let rival_sums = blp_instruments(&primitives.characteristics, &self.ownership)?;
        let instruments = stack_rows(&primitives.cost_shifters, &rival_sums);

        Ok(BlpMarket {
            characteristics,
            cost_shifters: primitives.cost_shifters,
            instruments,
            xi: primitives.xi,
            omega: primitives.omega,
            draws: primitives.draws,
            marginal_costs,
            prices: solved.prices,
            shares,
            equilibrium: solved.summary,
        })
    }
}

/// BLP-style instruments built from exogenous `M x J` characteristics.
///
/// Returns a `3M x J` matrix: rows `0..M` are the product's own characteristics,
/// rows `M..2M` sum the characteristics of the firm's other products, and rows
/// `2M..3M` sum the characteristics of rival firms' products.
pub fn blp_instruments(x: &DMatrix<f64>, ownership: &Ownership) -> Result<DMatrix<f64>> {
    let (m, products) = x.shape();
    if ownership.product_count() != products {
        return Err(BlpError::dimension_mismatch(
            "ownership length",
            products,
            ownership.product_count(),
        ));
    }

    let totals = x.column_sum();
    let mut instruments = DMatrix::zeros(3 * m, products);
    for group in ownership.groups() {
        let mut firm_total = DVector::zeros(m);
        for &j in group {
            firm_total += x.column(j);
        }
        for &j in group {
            let own = x.column(j);
            let same_firm = &firm_total - own;
            let rivals = &totals - &firm_total;
            for row in 0..m {
                instruments[(row, j)] = own[row];
                instruments[(m + row, j)] = same_firm[row];
                instruments[(2 * m + row, j)] = rivals[row];
            }
        }
    }
    Ok(instruments)
}

fn stack_rows(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    let cols = top.ncols();
    DMatrix::from_fn(top.nrows() + bottom.nrows(), cols, |row, col| {
        if row < top.nrows() {
            top[(row, col)]
        } else {
            bottom[(row - top.nrows(), col)]
        }
    })
}

fn map_markets<P, M, F>(primitives: Vec<P>, parallel: bool, solve: F) -> Result<Vec<M>>
where
    P: Send,
    M: Send,
    F: Fn(P) -> Result<M> + Sync + Send,
{
    if parallel {
        primitives.into_par_iter().map(solve).collect()
    } else {
        primitives.into_iter().map(solve).collect()
    }
}

fn check_counts(markets: usize, draws: usize) -> Result<()> {
    if markets == 0 {
        return Err(BlpError::dimension_mismatch("market count", 1, 0));
    }
    if draws == 0 {
        return Err(BlpError::dimension_mismatch("simulation draws", 1, 0));
    }
    Ok(())
}

fn check_variance(name: &'static str, variance: f64) -> Result<()> {
    if !variance.is_finite() || variance < 0.0 {
        return Err(BlpError::invalid_parameter(
            name,
            format!("variance must be finite and non-negative, found {variance}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::seeded_rng;
    use crate::supply::DemandParameters;
    use approx::assert_relative_eq;

    fn blp_config() -> BlpConfig {
        let demand = DemandParameters::new(
            DVector::from_vec(vec![-2.0, 1.0, 0.5]),
            DVector::from_vec(vec![0.5, 0.5, 0.2]),
        )
        .unwrap();
        BlpConfig::new(4, 6, demand, DVector::from_vec(vec![0.3, 0.2]), 200)
            .with_var_xi(0.25)
            .with_var_omega(0.1)
    }

    #[test]
    fn blp_instruments_split_own_firm_and_rival_sums() {
        let x = DMatrix::from_row_slice(1, 4, &[1.0, 2.0, 4.0, 8.0]);
        let ownership = Ownership::from_firm_ids(&[0, 0, 1, 2]);
        let z = blp_instruments(&x, &ownership).unwrap();
        assert_eq!(z.shape(), (3, 4));
        assert_eq!(z.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0, 4.0, 8.0]);
        assert_eq!(z.row(1).iter().copied().collect::<Vec<_>>(), vec![2.0, 1.0, 0.0, 0.0]);
        assert_eq!(z.row(2).iter().copied().collect::<Vec<_>>(), vec![12.0, 12.0, 11.0, 7.0]);
    }

    #[test]
    fn blp_markets_carry_solved_prices_in_characteristics() {
        let simulator = BlpSimulator::new(blp_config()).unwrap();
        let data = simulator.simulate(&mut seeded_rng(2024)).unwrap();

        assert_eq!(data.market_count(), 6);
        for market in data.markets() {
            assert_eq!(market.characteristics.shape(), (3, 4));
            assert_eq!(market.instruments.shape(), (2 + 3 * 2, 4));
            assert_eq!(market.characteristics.row(0).transpose(), market.prices);
            assert!(market.equilibrium.converged);
            assert!(market.markups().iter().all(|m| *m > 0.0));
            assert!(market.outside_share() > 0.0);
        }
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let parallel = BlpSimulator::new(blp_config()).unwrap();
        let sequential = BlpSimulator::new(blp_config().with_parallel(false)).unwrap();
        let a = parallel.simulate(&mut seeded_rng(5)).unwrap();
        let b = sequential.simulate(&mut seeded_rng(5)).unwrap();
        for (left, right) in a.markets().iter().zip(b.markets()) {
            assert_eq!(left.prices, right.prices);
            assert_eq!(left.shares, right.shares);
        }
    }

    #[test]
    fn mismatched_firm_ids_fail_before_simulation() {
        let config = blp_config().with_firm_ids(vec![0, 1]);
        assert!(matches!(
            BlpSimulator::new(config),
            Err(BlpError::DimensionMismatch { context: "firm ids", .. })
        ));
    }

    #[test]
    fn iv_characteristics_follow_first_stage() {
        let demand = DemandParameters::new(
            DVector::from_vec(vec![1.0, -0.5]),
            DVector::from_vec(vec![0.2, 0.2]),
        )
        .unwrap();
        let first_stage = vec![
            DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.5, 1.0, -0.3, 0.2]),
            DMatrix::from_row_slice(3, 2, &[0.2, 0.3, 1.0, -0.4, 0.0, 0.7]),
        ];
        let config = IvLogitConfig::new(4, demand, first_stage.clone(), 0.4, 25).with_parallel(false);
        let data = IvLogitSimulator::new(config).unwrap().simulate(&mut seeded_rng(31)).unwrap();

        for market in data.markets() {
            assert_eq!(market.instruments.shape(), (3, 2));
            for (j, pi) in first_stage.iter().enumerate() {
                let expected = pi.tr_mul(&market.instruments.column(j)) + &market.endogenous;
                assert_relative_eq!(
                    market.characteristics.column(j).into_owned(),
                    expected,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn iv_logit_rejects_ragged_first_stage() {
        let demand = DemandParameters::new(DVector::from_vec(vec![1.0, 1.0]), DVector::zeros(2)).unwrap();
        let first_stage = vec![DMatrix::zeros(3, 2), DMatrix::zeros(2, 2)];
        let config = IvLogitConfig::new(10, demand, first_stage, 0.5, 10);
        assert!(matches!(
            IvLogitSimulator::new(config),
            Err(BlpError::DimensionMismatch { context: "first-stage rows", .. })
        ));
    }

    #[test]
    fn iv_logit_rejects_out_of_range_rho() {
        let demand = DemandParameters::new(DVector::from_vec(vec![1.0]), DVector::zeros(1)).unwrap();
        let config = IvLogitConfig::new(10, demand, vec![DMatrix::zeros(1, 1)], 1.5, 10);
        assert!(matches!(
            IvLogitSimulator::new(config),
            Err(BlpError::InvalidParameter { name: "rho", .. })
        ));
    }
}
