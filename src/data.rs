//! Containers for simulated market data and their flattened product-level view.

use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BlpError, Result};
use crate::integration::TasteDraws;
use crate::solving::EquilibriumSummary;

/// Common accessors of a simulated market used to assemble product-level tables.
pub trait MarketRecord {
    /// `K x J` characteristics as observed by an econometrician.
    fn characteristics(&self) -> &DMatrix<f64>;
    /// `L x J` excluded instruments.
    fn instruments(&self) -> &DMatrix<f64>;
    /// Observed market shares.
    fn shares(&self) -> &DVector<f64>;

    fn product_count(&self) -> usize {
        self.shares().len()
    }
}

/// One market drawn by the instrumental-variables random-coefficients logit simulator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IvLogitMarket {
    /// `K x J` characteristics `x = π'z + endo`.
    pub characteristics: DMatrix<f64>,
    /// `L x J` instruments `z`.
    pub instruments: DMatrix<f64>,
    /// Endogenous component shared by every product in the market (length `K`).
    pub endogenous: DVector<f64>,
    /// Demand shocks `ξ`.
    pub xi: DVector<f64>,
    pub draws: TasteDraws,
    pub shares: DVector<f64>,
}

impl MarketRecord for IvLogitMarket {
    fn characteristics(&self) -> &DMatrix<f64> {
        &self.characteristics
    }

    fn instruments(&self) -> &DMatrix<f64> {
        &self.instruments
    }

    fn shares(&self) -> &DVector<f64> {
        &self.shares
    }
}

/// One market drawn by the BLP simulator, priced at the Bertrand–Nash equilibrium.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlpMarket {
    /// `K x J` characteristics; row 0 holds the equilibrium prices.
    pub characteristics: DMatrix<f64>,
    /// `L x J` cost shifters `w`.
    pub cost_shifters: DMatrix<f64>,
    /// Cost shifters stacked over own-firm and rival characteristic sums.
    pub instruments: DMatrix<f64>,
    pub xi: DVector<f64>,
    pub omega: DVector<f64>,
    pub draws: TasteDraws,
    pub marginal_costs: DVector<f64>,
    pub prices: DVector<f64>,
    pub shares: DVector<f64>,
    /// Convergence diagnostics of the price solve for this market.
    pub equilibrium: EquilibriumSummary,
}

impl BlpMarket {
    /// Price–cost margins `p − mc`.
    pub fn markups(&self) -> DVector<f64> {
        &self.prices - &self.marginal_costs
    }

    /// Variable profit per unit of market size, `s ⊙ (p − mc)`.
    pub fn profits(&self) -> DVector<f64> {
        self.markups().component_mul(&self.shares)
    }

    pub fn outside_share(&self) -> f64 {
        1.0 - self.shares.sum()
    }
}

impl MarketRecord for BlpMarket {
    fn characteristics(&self) -> &DMatrix<f64> {
        &self.characteristics
    }

    fn instruments(&self) -> &DMatrix<f64> {
        &self.instruments
    }

    fn shares(&self) -> &DVector<f64> {
        &self.shares
    }
}

/// A collection of independently simulated markets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatedMarkets<M> {
    markets: Vec<M>,
}

/// Output of the IV random-coefficients logit simulator.
pub type IvLogitData = SimulatedMarkets<IvLogitMarket>;

/// Output of the BLP simulator.
pub type BlpData = SimulatedMarkets<BlpMarket>;

impl<M> SimulatedMarkets<M> {
    pub fn new(markets: Vec<M>) -> Self {
        Self { markets }
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    pub fn markets(&self) -> &[M] {
        &self.markets
    }

    pub fn market(&self, index: usize) -> Option<&M> {
        self.markets.get(index)
    }

    pub fn into_markets(self) -> Vec<M> {
        self.markets
    }
}

impl<M: MarketRecord> SimulatedMarkets<M> {
    /// Shares arranged as a `J x T` matrix; requires the same `J` in every market.
    pub fn share_matrix(&self) -> Result<DMatrix<f64>> {
        let products = self.markets.first().map_or(0, |m| m.product_count());
        let mut matrix = DMatrix::zeros(products, self.markets.len());
        for (t, market) in self.markets.iter().enumerate() {
            if market.product_count() != products {
                return Err(BlpError::dimension_mismatch(
                    "products per market",
                    products,
                    market.product_count(),
                ));
            }
            matrix.set_column(t, market.shares());
        }
        Ok(matrix)
    }

    /// Stacks every market into a long product-level table.
    pub fn product_table(&self) -> Result<ProductTable> {
        let Some(first) = self.markets.first() else {
            return Err(BlpError::dimension_mismatch("market count", 1, 0));
        };
        let k = first.characteristics().nrows();
        let l = first.instruments().nrows();
        let n: usize = self.markets.iter().map(|m| m.product_count()).sum();

        let mut market_ids = Vec::with_capacity(n);
        let mut shares = DVector::zeros(n);
        let mut characteristics = DMatrix::zeros(n, k);
        let mut instruments = DMatrix::zeros(n, l);

        let mut row = 0usize;
        for (t, market) in self.markets.iter().enumerate() {
            if market.characteristics().nrows() != k {
                return Err(BlpError::dimension_mismatch(
                    "characteristic rows",
                    k,
                    market.characteristics().nrows(),
                ));
            }
            if market.instruments().nrows() != l {
                return Err(BlpError::dimension_mismatch(
                    "instrument rows",
                    l,
                    market.instruments().nrows(),
                ));
            }
            for j in 0..market.product_count() {
                market_ids.push(t);
                shares[row] = market.shares()[j];
                characteristics.set_row(row, &market.characteristics().column(j).transpose());
                instruments.set_row(row, &market.instruments().column(j).transpose());
                row += 1;
            }
        }

        Ok(ProductTable {
            market_ids,
            shares,
            characteristics,
            instruments,
        })
    }
}

/// Long-format product data: one row per product and market.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductTable {
    /// Market index of every row; rows of a market are contiguous.
    pub market_ids: Vec<usize>,
    pub shares: DVector<f64>,
    /// `N x K` characteristics.
    pub characteristics: DMatrix<f64>,
    /// `N x L` instruments.
    pub instruments: DMatrix<f64>,
}

impl ProductTable {
    pub fn product_count(&self) -> usize {
        self.market_ids.len()
    }

    /// Row range belonging to market `t`.
    pub fn market_range(&self, t: usize) -> Range<usize> {
        let start = self.market_ids.partition_point(|id| *id < t);
        let end = self.market_ids.partition_point(|id| *id <= t);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(shares: &[f64], offset: f64) -> IvLogitMarket {
        let j = shares.len();
        IvLogitMarket {
            characteristics: DMatrix::from_fn(2, j, |k, col| offset + (k * 10 + col) as f64),
            instruments: DMatrix::from_element(1, j, offset),
            endogenous: DVector::zeros(2),
            xi: DVector::zeros(j),
            draws: TasteDraws::from_nodes(DMatrix::zeros(2, 1)).unwrap(),
            shares: DVector::from_vec(shares.to_vec()),
        }
    }

    #[test]
    fn product_table_stacks_markets_in_order() {
        let data = SimulatedMarkets::new(vec![market(&[0.1, 0.2], 0.0), market(&[0.3, 0.4], 100.0)]);
        let table = data.product_table().unwrap();

        assert_eq!(table.product_count(), 4);
        assert_eq!(table.market_ids, vec![0, 0, 1, 1]);
        assert_eq!(table.market_range(1), 2..4);
        assert_eq!(table.shares[2], 0.3);
        assert_eq!(table.characteristics[(1, 1)], 11.0);
        assert_eq!(table.characteristics[(3, 0)], 101.0);
        assert_eq!(table.instruments[(2, 0)], 100.0);
    }

    #[test]
    fn share_matrix_requires_equal_product_counts() {
        let data = SimulatedMarkets::new(vec![market(&[0.1, 0.2], 0.0), market(&[0.3], 0.0)]);
        assert!(matches!(
            data.share_matrix(),
            Err(BlpError::DimensionMismatch { .. })
        ));
    }
}
