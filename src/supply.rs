//! Supply side: firm ownership and the ζ-markup contraction for Bertrand–Nash prices.
//!
//! The solver follows Morrow & Skerlos: writing the share Jacobian as `Λ − Γ`, the
//! multi-product first-order condition `s + (O ⊙ ∂s/∂p)(p − mc) = 0` rearranges into
//! the fixed point `p − mc = ζ(p) = Λ⁻¹ (O ⊙ Γ)(p − mc) − Λ⁻¹ s`, which is iterated
//! from `p = 1.1 · mc`.

use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::demand::share_price_derivatives;
use crate::error::{BlpError, Result};
use crate::integration::TasteDraws;
use crate::solving::{EquilibriumOptions, EquilibriumSummary};

/// Markup applied to marginal costs for the first iterate.
const INITIAL_MARKUP: f64 = 1.1;

/// Mean tastes `β` and taste dispersion `σ`, one entry per characteristic.
///
/// When prices are part of the characteristics, entry 0 belongs to price.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandParameters {
    pub beta: DVector<f64>,
    pub sigma: DVector<f64>,
}

impl DemandParameters {
    /// Validates that `beta` and `sigma` describe the same characteristics.
    pub fn new(beta: DVector<f64>, sigma: DVector<f64>) -> Result<Self> {
        let parameters = Self { beta, sigma };
        parameters.validate()?;
        Ok(parameters)
    }

    /// Checks that `beta` and `sigma` have the same, non-zero length.
    pub fn validate(&self) -> Result<()> {
        if self.beta.is_empty() {
            return Err(BlpError::dimension_mismatch("beta length", 1, 0));
        }
        if self.sigma.len() != self.beta.len() {
            return Err(BlpError::dimension_mismatch(
                "sigma length",
                self.beta.len(),
                self.sigma.len(),
            ));
        }
        Ok(())
    }

    /// Number of characteristics `K`.
    pub fn dimension(&self) -> usize {
        self.beta.len()
    }
}

/// Partition of products into firms.
///
/// Products sharing a firm id are priced jointly. Firms are kept as groups of
/// product indices so `O ⊙ Γ` can be applied block by block. Only the firm ids are
/// serialized; the groups are rebuilt on deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<usize>", into = "Vec<usize>")]
pub struct Ownership {
    firm_ids: Vec<usize>,
    groups: Vec<Vec<usize>>,
}

impl Ownership {
    /// Builds the ownership structure from one firm label per product.
    pub fn from_firm_ids(firm_ids: &[usize]) -> Self {
        let mut index_of_firm: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (product, firm) in firm_ids.iter().enumerate() {
            let group = *index_of_firm.entry(*firm).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(product);
        }
        Self {
            firm_ids: firm_ids.to_vec(),
            groups,
        }
    }

    /// Every product is owned by its own firm.
    pub fn single_product(products: usize) -> Self {
        let ids: Vec<usize> = (0..products).collect();
        Self::from_firm_ids(&ids)
    }

    /// A single firm owns every product.
    pub fn monopoly(products: usize) -> Self {
        Self::from_firm_ids(&vec![0; products])
    }

    pub fn product_count(&self) -> usize {
        self.firm_ids.len()
    }

    pub fn firm_count(&self) -> usize {
        self.groups.len()
    }

    pub fn firm_ids(&self) -> &[usize] {
        &self.firm_ids
    }

    /// Product indices grouped by owning firm, in order of first appearance.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Whether products `a` and `b` share an owner; `false` if either index is out of range.
    pub fn same_firm(&self, a: usize, b: usize) -> bool {
        match (self.firm_ids.get(a), self.firm_ids.get(b)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }

    /// Dense ownership mask `O[i, j] = 1{firm(i) = firm(j)}`.
    pub fn mask(&self) -> DMatrix<f64> {
        let n = self.product_count();
        DMatrix::from_fn(n, n, |i, j| if self.same_firm(i, j) { 1.0 } else { 0.0 })
    }

    /// Computes `(O ⊙ matrix) v` without materializing the mask.
    pub fn masked_product(&self, matrix: &DMatrix<f64>, v: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(v.len());
        for group in &self.groups {
            for &row in group {
                out[row] = group.iter().map(|&col| matrix[(row, col)] * v[col]).sum();
            }
        }
        out
    }
}

impl From<Vec<usize>> for Ownership {
    fn from(firm_ids: Vec<usize>) -> Self {
        Self::from_firm_ids(&firm_ids)
    }
}

impl From<Ownership> for Vec<usize> {
    fn from(ownership: Ownership) -> Self {
        ownership.firm_ids
    }
}

/// Solved prices plus convergence diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EquilibriumPrices {
    pub prices: DVector<f64>,
    pub summary: EquilibriumSummary,
}

/// Solves for Bertrand–Nash equilibrium prices in one market.
///
/// `x` holds the `(K − 1) x J` non-price characteristics; prices are inserted as
/// characteristic 0. Iteration stops once both the price step and the
/// first-order-condition residual are within tolerance, or after
/// `options.max_iterations` iterations. In the latter case the last iterate is
/// returned with `summary.converged == false` unless
/// `options.require_convergence` is set.
pub fn equilibrium_prices(
    marginal_costs: &DVector<f64>,
    demand: &DemandParameters,
    xi: &DVector<f64>,
    x: &DMatrix<f64>,
    draws: &TasteDraws,
    ownership: &Ownership,
    options: &EquilibriumOptions,
) -> Result<EquilibriumPrices> {
    let products = marginal_costs.len();
    if ownership.product_count() != products {
        return Err(BlpError::dimension_mismatch(
            "ownership length",
            products,
            ownership.product_count(),
        ));
    }
    if xi.len() != products {
        return Err(BlpError::dimension_mismatch("xi length", products, xi.len()));
    }

    let tolerance = options.tolerance;
    let trace_interval = options.trace_interval.max(1);
    let mut prices = marginal_costs * INITIAL_MARKUP;
    let mut iterations = 0usize;
    let mut focnorm = f64::INFINITY;
    let mut step_norm = f64::INFINITY;

    while iterations < options.max_iterations && (step_norm > tolerance || focnorm > tolerance) {
        let derivatives =
            share_price_derivatives(&demand.beta, &demand.sigma, &prices, x, draws, xi)?;
        let inverse_lambda = invert_own_effect(&derivatives.lambda)?;

        let markup = &prices - marginal_costs;
        let interaction = ownership.masked_product(&derivatives.gamma, &markup);
        let zeta = (interaction - &derivatives.shares).component_mul(&inverse_lambda);
        focnorm = (&markup - &zeta).component_mul(&derivatives.lambda).norm();

        let updated = marginal_costs + &zeta;
        step_norm = (&updated - &prices).norm();
        prices = updated;
        iterations += 1;

        if !step_norm.is_finite() || !focnorm.is_finite() {
            return Err(BlpError::NumericalError {
                context: "equilibrium price update",
            });
        }
        if options.verbose && iterations % trace_interval == 0 {
            info!(
                "iteration {iterations}: focnorm = {focnorm:.3e}, dp = {step_norm:.3e}"
            );
        }
    }

    let converged = step_norm <= tolerance && focnorm <= tolerance;
    if converged {
        debug!("equilibrium prices converged after {iterations} iterations");
    } else if options.require_convergence {
        return Err(BlpError::EquilibriumDidNotConverge {
            iterations,
            focnorm,
            step_norm,
        });
    } else {
        warn!(
            "equilibrium prices did not converge after {iterations} iterations \
             (focnorm = {focnorm:.3e}, dp = {step_norm:.3e}); returning last iterate"
        );
    }

    Ok(EquilibriumPrices {
        prices,
        summary: EquilibriumSummary {
            iterations,
            focnorm,
            step_norm,
            converged,
        },
    })
}

/// Elementwise inverse of the diagonal own-effect matrix.
fn invert_own_effect(lambda: &DVector<f64>) -> Result<DVector<f64>> {
    if lambda.iter().any(|value| *value == 0.0 || !value.is_finite()) {
        return Err(BlpError::singular("own-effect matrix Λ"));
    }
    Ok(lambda.map(|value| 1.0 / value))
}
