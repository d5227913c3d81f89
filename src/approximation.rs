use faer::{Col, Mat};

use crate::E;

/// First-order model of a vector-valued function of `(x, u)`:
///
/// ```text
///   f(x + dx, u + du) ≈ f + dfdx dx + dfdu du
/// ```
///
/// Constraint and dynamics blocks use the number of rows of `f` as their
/// block size; a block with zero rows is treated as absent.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearApproximation {
    pub f: Col<E>,
    pub dfdx: Mat<E>,
    pub dfdu: Mat<E>,
}

impl LinearApproximation {
    pub fn zeros(nv: usize, nx: usize, nu: usize) -> Self {
        Self {
            f: Col::zeros(nv),
            dfdx: Mat::zeros(nv, nx),
            dfdu: Mat::zeros(nv, nu),
        }
    }

    /// The zero-row block standing in for "no constraint / no projection".
    pub fn absent(nx: usize, nu: usize) -> Self {
        Self::zeros(0, nx, nu)
    }

    pub fn nrows(&self) -> usize {
        self.f.nrows()
    }

    pub fn is_absent(&self) -> bool {
        self.f.nrows() == 0
    }

    /// Stacks two blocks sharing the same `(nx, nu)` column dimensions.
    pub fn stacked(upper: &Self, lower: &Self) -> Self {
        let (nu_rows, nl_rows) = (upper.nrows(), lower.nrows());
        let nv = nu_rows + nl_rows;
        let pick = |i: usize, j: usize, a: &Mat<E>, b: &Mat<E>| {
            if i < nu_rows { a[(i, j)] } else { b[(i - nu_rows, j)] }
        };
        Self {
            f: Col::from_fn(nv, |i| {
                if i < nu_rows { upper.f[i] } else { lower.f[i - nu_rows] }
            }),
            dfdx: Mat::from_fn(nv, upper.dfdx.ncols(), |i, j| pick(i, j, &upper.dfdx, &lower.dfdx)),
            dfdu: Mat::from_fn(nv, upper.dfdu.ncols(), |i, j| pick(i, j, &upper.dfdu, &lower.dfdu)),
        }
    }
}

/// Second-order model of a scalar function of `(x, u)`:
///
/// ```text
///   f(x + dx, u + du) ≈ f + dfdx' dx + dfdu' du
///                     + 1/2 dx' dfdxx dx + 1/2 du' dfduu du + du' dfdux dx
/// ```
///
/// `dfdux` has shape `nu × nx`. State-only expansions (event and terminal
/// costs) carry zero-sized input blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadraticApproximation {
    pub f: E,
    pub dfdx: Col<E>,
    pub dfdu: Col<E>,
    pub dfdxx: Mat<E>,
    pub dfduu: Mat<E>,
    pub dfdux: Mat<E>,
}

impl QuadraticApproximation {
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self {
            f: 0.,
            dfdx: Col::zeros(nx),
            dfdu: Col::zeros(nu),
            dfdxx: Mat::zeros(nx, nx),
            dfduu: Mat::zeros(nu, nu),
            dfdux: Mat::zeros(nu, nx),
        }
    }

    /// Expansion in the state only, with empty input blocks.
    pub fn state_only(f: E, dfdx: Col<E>, dfdxx: Mat<E>) -> Self {
        let nx = dfdx.nrows();
        Self {
            f,
            dfdx,
            dfdu: Col::zeros(0),
            dfdxx,
            dfduu: Mat::zeros(0, 0),
            dfdux: Mat::zeros(0, nx),
        }
    }

    pub fn nx(&self) -> usize {
        self.dfdx.nrows()
    }

    pub fn nu(&self) -> usize {
        self.dfdu.nrows()
    }

    /// Scales every term, e.g. to integrate a rate expansion over `dt`.
    pub fn scale(&mut self, s: E) {
        self.f *= s;
        self.dfdx = s * &self.dfdx;
        self.dfdu = s * &self.dfdu;
        self.dfdxx = s * &self.dfdxx;
        self.dfduu = s * &self.dfduu;
        self.dfdux = s * &self.dfdux;
    }

    /// Accumulates another expansion of the same dimensions.
    pub fn add(&mut self, other: &Self) {
        self.f += other.f;
        self.dfdx = &self.dfdx + &other.dfdx;
        self.dfdu = &self.dfdu + &other.dfdu;
        self.dfdxx = &self.dfdxx + &other.dfdxx;
        self.dfduu = &self.dfduu + &other.dfduu;
        self.dfdux = &self.dfdux + &other.dfdux;
    }
}
