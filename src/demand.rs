//! Demand-side primitives: simulated random-coefficients logit shares and their price derivatives.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BlpError, Result};
use crate::integration::TasteDraws;

/// Share vector together with the price Jacobian and its Morrow–Skerlos decomposition.
///
/// The Jacobian satisfies `jacobian = diag(lambda) - gamma` exactly, where
/// `lambda[j] = E[α_i s_ij]` and `gamma[j, k] = E[α_i s_ij s_ik]` with
/// `α_i` the effective price coefficient of consumer type `i`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareDerivatives {
    /// Simulated market shares.
    pub shares: DVector<f64>,
    /// `jacobian[(j, k)] = ∂s_j / ∂p_k`.
    pub jacobian: DMatrix<f64>,
    /// Diagonal of the own-effect matrix Λ.
    pub lambda: DVector<f64>,
    /// Interaction matrix Γ.
    pub gamma: DMatrix<f64>,
}

impl ShareDerivatives {
    /// Returns Λ as a dense diagonal matrix.
    pub fn lambda_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.lambda)
    }

    /// Number of products in the market.
    pub fn product_count(&self) -> usize {
        self.shares.len()
    }
}

/// Stacks prices on top of the non-price characteristics, producing a fresh `K x J` matrix.
pub fn with_price_row(prices: &DVector<f64>, x: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if x.ncols() != prices.len() {
        return Err(BlpError::dimension_mismatch(
            "characteristic columns",
            prices.len(),
            x.ncols(),
        ));
    }
    Ok(DMatrix::from_fn(x.nrows() + 1, x.ncols(), |row, col| {
        if row == 0 {
            prices[col]
        } else {
            x[(row - 1, col)]
        }
    }))
}

/// Mean utilities `δ = x'β + ξ` for a `K x J` characteristics matrix.
pub fn mean_utility(beta: &DVector<f64>, x: &DMatrix<f64>, xi: &DVector<f64>) -> Result<DVector<f64>> {
    if x.nrows() != beta.len() {
        return Err(BlpError::dimension_mismatch("characteristic rows", beta.len(), x.nrows()));
    }
    if xi.len() != x.ncols() {
        return Err(BlpError::dimension_mismatch("xi length", x.ncols(), xi.len()));
    }
    Ok(x.tr_mul(beta) + xi)
}

/// Computes simulated market shares for one market.
///
/// `x` is `K x J`, `sigma` has length `K` and `draws` must have dimension `K`.
/// Consumer type `i` has utility `δ_j + Σ_k σ_k ν_ki x_kj` for product `j` and
/// zero for the outside option.
pub fn shares(
    mean_utility: &DVector<f64>,
    sigma: &DVector<f64>,
    x: &DMatrix<f64>,
    draws: &TasteDraws,
) -> Result<DVector<f64>> {
    check_share_inputs(mean_utility, sigma, x, draws)?;

    let mut predicted = DVector::zeros(mean_utility.len());
    let mut probabilities = DVector::zeros(mean_utility.len());
    for (draw_index, weight) in draws.weights().iter().enumerate() {
        choice_probabilities(mean_utility, sigma, x, draws, draw_index, &mut probabilities)?;
        predicted.axpy(*weight, &probabilities, 1.0);
    }
    Ok(predicted)
}

/// Computes shares, the price Jacobian, Λ and Γ at the given prices.
///
/// Prices enter as the first characteristic: `x` holds the remaining
/// `(K - 1) x J` characteristics and row 0 of the draws is the price taste.
pub fn share_price_derivatives(
    beta: &DVector<f64>,
    sigma: &DVector<f64>,
    prices: &DVector<f64>,
    x: &DMatrix<f64>,
    draws: &TasteDraws,
    xi: &DVector<f64>,
) -> Result<ShareDerivatives> {
    let k = beta.len();
    if k == 0 {
        return Err(BlpError::dimension_mismatch("beta length", 1, 0));
    }
    if sigma.len() != k {
        return Err(BlpError::dimension_mismatch("sigma length", k, sigma.len()));
    }
    if x.nrows() + 1 != k {
        return Err(BlpError::dimension_mismatch("non-price characteristic rows", k - 1, x.nrows()));
    }

    let characteristics = with_price_row(prices, x)?;
    let delta = mean_utility(beta, &characteristics, xi)?;
    check_share_inputs(&delta, sigma, &characteristics, draws)?;

    let j = prices.len();
    let alphas = draws.price_coefficients(beta[0], sigma[0]);
    let mut shares = DVector::zeros(j);
    let mut lambda = DVector::zeros(j);
    let mut gamma = DMatrix::zeros(j, j);
    let mut probabilities = DVector::zeros(j);

    for (draw_index, weight) in draws.weights().iter().enumerate() {
        choice_probabilities(&delta, sigma, &characteristics, draws, draw_index, &mut probabilities)?;
        let scaled = *weight * alphas[draw_index];
        shares.axpy(*weight, &probabilities, 1.0);
        lambda.axpy(scaled, &probabilities, 1.0);
        gamma.ger(scaled, &probabilities, &probabilities, 1.0);
    }

    let mut jacobian = -gamma.clone();
    for (index, own) in lambda.iter().enumerate() {
        jacobian[(index, index)] += *own;
    }

    Ok(ShareDerivatives {
        shares,
        jacobian,
        lambda,
        gamma,
    })
}

/// Price elasticities `e_jk = (∂s_j/∂p_k) p_k / s_j`.
pub fn elasticities(derivatives: &ShareDerivatives, prices: &DVector<f64>) -> Result<DMatrix<f64>> {
    let j = derivatives.product_count();
    if prices.len() != j {
        return Err(BlpError::dimension_mismatch("prices length", j, prices.len()));
    }
    if derivatives.shares.iter().any(|share| *share <= 0.0) {
        return Err(BlpError::NumericalError {
            context: "elasticity share normalization",
        });
    }
    Ok(DMatrix::from_fn(j, j, |row, col| {
        derivatives.jacobian[(row, col)] * prices[col] / derivatives.shares[row]
    }))
}

fn check_share_inputs(
    mean_utility: &DVector<f64>,
    sigma: &DVector<f64>,
    x: &DMatrix<f64>,
    draws: &TasteDraws,
) -> Result<()> {
    if x.ncols() != mean_utility.len() {
        return Err(BlpError::dimension_mismatch(
            "characteristic columns",
            mean_utility.len(),
            x.ncols(),
        ));
    }
    if sigma.len() != x.nrows() {
        return Err(BlpError::dimension_mismatch("sigma length", x.nrows(), sigma.len()));
    }
    if draws.dimension() != x.nrows() {
        return Err(BlpError::dimension_mismatch("draw dimension", x.nrows(), draws.dimension()));
    }
    Ok(())
}

/// Logit choice probabilities of consumer type `draw_index`, written into `out`.
fn choice_probabilities(
    mean_utility: &DVector<f64>,
    sigma: &DVector<f64>,
    x: &DMatrix<f64>,
    draws: &TasteDraws,
    draw_index: usize,
    out: &mut DVector<f64>,
) -> Result<()> {
    let taste = sigma.component_mul(&draws.nodes().column(draw_index));
    let utilities = mean_utility + x.tr_mul(&taste);

    // Shift by the largest utility, counting the outside option's zero.
    let shift = utilities.iter().fold(0.0_f64, |acc, u| acc.max(*u));
    let mut denominator = (-shift).exp();
    for (slot, utility) in out.iter_mut().zip(utilities.iter()) {
        *slot = (utility - shift).exp();
        denominator += *slot;
    }
    if !denominator.is_finite() || utilities.iter().any(|u| u.is_nan()) {
        return Err(BlpError::NumericalError {
            context: "utility exponentiation",
        });
    }
    *out /= denominator;
    Ok(())
}
