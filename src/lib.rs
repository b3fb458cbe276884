//! Simulated Berry–Levinsohn–Pakes (BLP) markets with Bertrand–Nash equilibrium pricing.
//!
//! The crate generates synthetic discrete-choice datasets under the random
//! coefficients logit model and solves the multi-product pricing game implied by
//! that demand system. It offers tools to
//!
//! - simulate heterogeneous consumer tastes (`integration` module),
//! - evaluate simulated shares and their price derivatives (`demand` module),
//! - solve for equilibrium prices with the ζ-markup contraction of Morrow &
//!   Skerlos (`supply` module), and
//! - draw complete markets, with or without a supply side (`simulation` module).
//!
//! # Quick start
//!
//! ```no_run
//! use blpsim::integration::seeded_rng;
//! use blpsim::options::BlpConfig;
//! use blpsim::simulation::BlpSimulator;
//! use blpsim::supply::DemandParameters;
//! use nalgebra::DVector;
//!
//! // Price plus one non-price characteristic, two cost shifters.
//! let demand = DemandParameters::new(
//!     DVector::from_vec(vec![-1.0, 1.0]),
//!     DVector::from_vec(vec![0.5, 0.5]),
//! )
//! .expect("matching beta and sigma");
//! let config = BlpConfig::new(3, 100, demand, DVector::from_vec(vec![0.2, 0.1]), 500)
//!     .with_firm_ids(vec![0, 0, 1]);
//!
//! let simulator = BlpSimulator::new(config).expect("well-formed configuration");
//! let data = simulator.simulate(&mut seeded_rng(1234)).expect("simulated markets");
//! let table = data.product_table().expect("stacked products");
//! println!("simulated {} products", table.product_count());
//! ```
//!
//! Non-converged price solves are not errors by default: every market carries an
//! [`EquilibriumSummary`] reporting the final residual and step norms.

pub mod data;
pub mod demand;
pub mod error;
pub mod integration;
pub mod options;
pub mod simulation;
pub mod solving;
pub mod supply;

pub use data::{BlpData, BlpMarket, IvLogitData, IvLogitMarket, ProductTable};
pub use error::{BlpError, Result};
pub use options::{BlpConfig, CostFunction, IvLogitConfig};
pub use simulation::{BlpSimulator, IvLogitSimulator};
pub use solving::{EquilibriumOptions, EquilibriumSummary};
pub use supply::{equilibrium_prices, DemandParameters, EquilibriumPrices, Ownership};
