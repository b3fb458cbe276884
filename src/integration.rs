//! Monte Carlo integration helpers for simulating heterogeneous consumer tastes.

use nalgebra::{DMatrix, DVector};
use rand::distributions::Standard;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Open01, StandardNormal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{BlpError, Result};

/// Upper bound on attempts per sampling strategy for a single truncated price draw.
const MAX_TRUNCATION_ATTEMPTS: usize = 10_000;

/// Returns a small, fast generator seeded for reproducible simulations.
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// Fills a `rows x cols` matrix with independent standard normal draws.
pub fn standard_normal_matrix<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| rng.sample(StandardNormal))
}

/// Fills a `rows x cols` matrix with independent draws from `U[0, 1)`.
pub fn standard_uniform_matrix<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| rng.sample(Standard))
}

/// Simulated consumer types for one market.
///
/// Nodes are stored as a `K x S` matrix: column `i` holds the taste deviations
/// `ν[:, i]` of consumer type `i`. Row 0 corresponds to the price characteristic
/// whenever prices are part of the characteristics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TasteDraws {
    nodes: DMatrix<f64>,
    weights: DVector<f64>,
}

impl TasteDraws {
    /// Builds taste draws from a node matrix and integration weights.
    pub fn new(nodes: DMatrix<f64>, weights: DVector<f64>) -> Result<Self> {
        if nodes.ncols() == 0 {
            return Err(BlpError::dimension_mismatch("simulation draws", 1, 0));
        }
        if nodes.ncols() != weights.len() {
            return Err(BlpError::dimension_mismatch(
                "draw weight length",
                nodes.ncols(),
                weights.len(),
            ));
        }
        for weight in weights.iter() {
            if *weight <= 0.0 {
                return Err(BlpError::invalid_parameter(
                    "weights",
                    format!("weights must be strictly positive, found {weight}"),
                ));
            }
        }
        let sum: f64 = weights.iter().sum();
        let slack = (sum - 1.0).abs();
        if slack > 1e-8 {
            return Err(BlpError::invalid_parameter(
                "weights",
                format!("weights must sum to one (slack {slack})"),
            ));
        }

        Ok(Self { nodes, weights })
    }

    /// Uses plain Monte Carlo weights `1 / S`.
    pub fn from_nodes(nodes: DMatrix<f64>) -> Result<Self> {
        let draws = nodes.ncols();
        if draws == 0 {
            return Err(BlpError::dimension_mismatch("simulation draws", 1, 0));
        }
        let weights = DVector::from_element(draws, 1.0 / draws as f64);
        Self::new(nodes, weights)
    }

    /// Generates `draws` standard normal consumer types of the given dimension.
    pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R, dimension: usize, draws: usize) -> Result<Self> {
        Self::from_nodes(standard_normal_matrix(rng, dimension, draws))
    }

    /// Generates standard normal types whose row 0 is truncated so that the
    /// effective price coefficient `beta0 + sigma0 * ν[0, i]` is strictly negative.
    ///
    /// Row 0 is drawn from the standard normal restricted to the half-line where
    /// `beta0 + sigma0 * ν < 0`; the remaining rows are unrestricted. Rare admissible
    /// regions (e.g. `beta0 > 0` with small `sigma0`) are sampled by inverting the
    /// normal CDF, so only an empty region reports `InfeasibleTasteDraws`.
    pub fn with_negative_price_coefficient<R: Rng + ?Sized>(
        rng: &mut R,
        dimension: usize,
        draws: usize,
        beta0: f64,
        sigma0: f64,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(BlpError::dimension_mismatch("price taste dimension", 1, 0));
        }
        if sigma0 == 0.0 && beta0 >= 0.0 {
            return Err(BlpError::invalid_parameter(
                "beta",
                format!("price coefficient must be negative without heterogeneity, found {beta0}"),
            ));
        }

        let mut nodes = standard_normal_matrix(rng, dimension, draws);
        if sigma0 != 0.0 {
            for i in 0..draws {
                nodes[(0, i)] = truncated_price_draw(rng, beta0, sigma0)?;
            }
        }
        Self::from_nodes(nodes)
    }

    /// Number of simulated consumer types `S`.
    pub fn draw_count(&self) -> usize {
        self.nodes.ncols()
    }

    /// Number of random coefficients `K`.
    pub fn dimension(&self) -> usize {
        self.nodes.nrows()
    }

    /// Returns a view of the `K x S` node matrix.
    pub fn nodes(&self) -> &DMatrix<f64> {
        &self.nodes
    }

    /// Returns the integration weights (normalized to sum to one).
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Effective price coefficient `beta0 + sigma0 * ν[0, i]` for every consumer type.
    pub fn price_coefficients(&self, beta0: f64, sigma0: f64) -> DVector<f64> {
        self.nodes.row(0).transpose().map(|nu| beta0 + sigma0 * nu)
    }
}

/// Draws `ν ~ N(0, 1)` conditional on `beta0 + sigma0 * ν < 0`.
///
/// Plain rejection while at least half the mass is admissible, inverse-CDF sampling
/// otherwise (and if rejection runs out of attempts).
fn truncated_price_draw<R: Rng + ?Sized>(rng: &mut R, beta0: f64, sigma0: f64) -> Result<f64> {
    let standard = Normal::new(0.0, 1.0).map_err(|_| BlpError::NumericalError {
        context: "standard normal construction",
    })?;
    let direction = sigma0.signum();
    let bound = -beta0 / sigma0.abs();
    let admissible = standard.cdf(bound);

    if admissible >= 0.5 {
        for _ in 0..MAX_TRUNCATION_ATTEMPTS {
            let candidate: f64 = rng.sample(StandardNormal);
            if beta0 + sigma0 * candidate < 0.0 {
                return Ok(candidate);
            }
        }
    }

    if admissible > 0.0 {
        for _ in 0..MAX_TRUNCATION_ATTEMPTS {
            let u: f64 = rng.sample(Open01);
            let candidate = direction * standard.inverse_cdf(u * admissible);
            if candidate.is_finite() && beta0 + sigma0 * candidate < 0.0 {
                return Ok(candidate);
            }
        }
    }

    Err(BlpError::InfeasibleTasteDraws {
        attempts: MAX_TRUNCATION_ATTEMPTS,
    })
}
