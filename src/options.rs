//! Configuration for the market simulators.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BlpError, Result};
use crate::solving::EquilibriumOptions;
use crate::supply::{DemandParameters, Ownership};

/// Maps cost shifters and cost shocks into marginal costs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostFunction {
    /// `mc = exp(w'γ + ω)`, always positive.
    #[default]
    Log,
    /// `mc = w'γ + ω`.
    Linear,
}

impl CostFunction {
    /// Marginal costs for one market given `L x J` shifters `w`, coefficients `γ` and shocks `ω`.
    pub fn marginal_costs(
        &self,
        cost_shifters: &DMatrix<f64>,
        gamma: &DVector<f64>,
        omega: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if cost_shifters.nrows() != gamma.len() {
            return Err(BlpError::dimension_mismatch(
                "cost shifter rows",
                gamma.len(),
                cost_shifters.nrows(),
            ));
        }
        if omega.len() != cost_shifters.ncols() {
            return Err(BlpError::dimension_mismatch(
                "omega length",
                cost_shifters.ncols(),
                omega.len(),
            ));
        }
        let index = cost_shifters.tr_mul(gamma) + omega;
        Ok(match self {
            CostFunction::Log => index.map(f64::exp),
            CostFunction::Linear => index,
        })
    }
}

/// Settings of the demand-only instrumental-variables random-coefficients logit simulator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IvLogitConfig {
    /// Number of markets `T`.
    pub markets: usize,
    /// Mean tastes and dispersion over the `K` characteristics.
    pub demand: DemandParameters,
    /// First-stage coefficients, one `L x K` matrix per product.
    pub first_stage: Vec<DMatrix<f64>>,
    /// Correlation between the demand shock and the common endogenous component.
    pub rho: f64,
    /// Simulation draws `S` per market.
    pub draws: usize,
    /// Variance of the demand shock.
    pub var_xi: f64,
    /// Evaluate markets on the rayon pool.
    pub parallel: bool,
}

impl IvLogitConfig {
    /// Creates a configuration with unit shock variance and parallel market evaluation.
    pub fn new(
        markets: usize,
        demand: DemandParameters,
        first_stage: Vec<DMatrix<f64>>,
        rho: f64,
        draws: usize,
    ) -> Self {
        Self {
            markets,
            demand,
            first_stage,
            rho,
            draws,
            var_xi: 1.0,
            parallel: true,
        }
    }

    /// Override the demand shock variance.
    pub fn with_var_xi(mut self, var_xi: f64) -> Self {
        self.var_xi = var_xi;
        self
    }

    /// Evaluate markets on the rayon pool or sequentially.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of products `J`.
    pub fn products(&self) -> usize {
        self.first_stage.len()
    }

    /// Number of instruments `L`.
    pub fn instruments(&self) -> usize {
        self.first_stage.first().map_or(0, |pi| pi.nrows())
    }
}

/// Settings of the BLP simulator with an equilibrium pricing supply side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlpConfig {
    /// Number of products `J` per market.
    pub products: usize,
    /// Number of markets `T`.
    pub markets: usize,
    /// Mean tastes and dispersion; entry 0 is the price characteristic.
    pub demand: DemandParameters,
    /// Cost coefficients `γ` over the `L` cost shifters.
    pub gamma: DVector<f64>,
    /// Simulation draws `S` per market.
    pub draws: usize,
    /// Variance of the demand shock.
    pub var_xi: f64,
    /// Variance of the cost shock.
    pub var_omega: f64,
    /// Firm label of every product; `None` means single-product firms.
    pub firm_ids: Option<Vec<usize>>,
    /// Mapping from cost shifters to marginal costs.
    pub cost_function: CostFunction,
    /// Settings of the per-market price solver.
    pub equilibrium: EquilibriumOptions,
    /// Solve markets on the rayon pool.
    pub parallel: bool,
}

impl BlpConfig {
    /// Creates a configuration with unit shock variances and single-product firms.
    /// Costs are logarithmic and markets are solved in parallel with default solver settings.
    pub fn new(
        products: usize,
        markets: usize,
        demand: DemandParameters,
        gamma: DVector<f64>,
        draws: usize,
    ) -> Self {
        Self {
            products,
            markets,
            demand,
            gamma,
            draws,
            var_xi: 1.0,
            var_omega: 1.0,
            firm_ids: None,
            cost_function: CostFunction::Log,
            equilibrium: EquilibriumOptions::default(),
            parallel: true,
        }
    }

    /// Override the demand shock variance.
    pub fn with_var_xi(mut self, var_xi: f64) -> Self {
        self.var_xi = var_xi;
        self
    }

    /// Override the cost shock variance.
    pub fn with_var_omega(mut self, var_omega: f64) -> Self {
        self.var_omega = var_omega;
        self
    }

    /// Assign products to firms; products with equal labels are priced jointly.
    pub fn with_firm_ids(mut self, firm_ids: Vec<usize>) -> Self {
        self.firm_ids = Some(firm_ids);
        self
    }

    /// Choose between log and linear marginal costs.
    pub fn with_cost_function(mut self, cost_function: CostFunction) -> Self {
        self.cost_function = cost_function;
        self
    }

    /// Replace the price solver settings.
    pub fn with_equilibrium(mut self, equilibrium: EquilibriumOptions) -> Self {
        self.equilibrium = equilibrium;
        self
    }

    /// Solve markets on the rayon pool or sequentially.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Ownership structure implied by `firm_ids`.
    pub fn ownership(&self) -> Ownership {
        match &self.firm_ids {
            Some(ids) => Ownership::from_firm_ids(ids),
            None => Ownership::single_product(self.products),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn log_costs_exponentiate_linear_index() {
        let w = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 2.0]);
        let gamma = DVector::from_vec(vec![0.2, 0.1]);
        let omega = DVector::from_vec(vec![0.0, -0.1]);

        let linear = CostFunction::Linear.marginal_costs(&w, &gamma, &omega).unwrap();
        let log = CostFunction::Log.marginal_costs(&w, &gamma, &omega).unwrap();
        assert_relative_eq!(linear[0], 0.25, epsilon = 1e-12);
        assert_relative_eq!(linear[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(log[0], 0.25_f64.exp(), epsilon = 1e-12);
    }

    #[test]
    fn default_ownership_is_single_product() {
        let demand = DemandParameters::new(DVector::from_vec(vec![-1.0]), DVector::zeros(1)).unwrap();
        let config = BlpConfig::new(3, 2, demand, DVector::zeros(1), 10);
        assert_eq!(config.ownership().firm_count(), 3);
        let merged = config.with_firm_ids(vec![4, 4, 5]);
        assert_eq!(merged.ownership().firm_count(), 2);
    }
}
