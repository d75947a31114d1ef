use crate::numerical::odr::problem_tls::TlsEvaluation;
use crate::numerical::odr::utils::enorm;
use itertools::izip;
use nalgebra::{DMatrix, DVector};

/// Jacobian of the stacked residual `F = [dx; f(p, x+dx) - y]` with respect
/// to the unknowns `X = [dx; p]`.
///
/// The full matrix has the shape
///
///   J = | J11   0  |
///       | J21  J22 |
///
/// where `J11` and `J21` are block-diagonal over observations (an observation
/// couples only to its own inputs) and only `J22` is dense. The blocks are
/// stored separately and the dense matrix is never formed; all products and
/// column norms run in O(MX) block operations.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockJacobian {
    mx: usize,
    nx: usize,
    ny: usize,
    np: usize,
    /// Per-observation `NX×NX` blocks, identity whenever the residual head is
    /// literally `dx`. Kept general so the factorization can be verified on
    /// arbitrary block-diagonal inputs.
    pub(crate) j11: Vec<DMatrix<f64>>,
    /// Per-observation `NY×NX` blocks, `∂f_i/∂x_i`.
    pub(crate) j21: Vec<DMatrix<f64>>,
    /// Dense `(MX*NY)×NP` parameter block, `∂f/∂p`.
    pub(crate) j22: DMatrix<f64>,
}

impl BlockJacobian {
    /// Allocate the blocks for `mx` observations; `J11` starts as identity.
    pub fn new(mx: usize, nx: usize, ny: usize, np: usize) -> Self {
        Self {
            mx,
            nx,
            ny,
            np,
            j11: (0..mx).map(|_| DMatrix::identity(nx, nx)).collect(),
            j21: (0..mx).map(|_| DMatrix::zeros(ny, nx)).collect(),
            j22: DMatrix::zeros(mx * ny, np),
        }
    }

    pub fn nrows(&self) -> usize {
        self.mx * (self.nx + self.ny)
    }

    pub fn ncols(&self) -> usize {
        self.mx * self.nx + self.np
    }

    /// Refill the blocks from a model evaluation at the current base point.
    /// The residual head is `dx` itself there, so `J11` is reset to identity.
    pub fn set_from(&mut self, eval: &TlsEvaluation) {
        for (i, (j11, j21)) in izip!(&mut self.j11, &mut self.j21).enumerate() {
            j11.fill_with_identity();
            j21.copy_from(&eval.dy_dx.rows(i * self.ny, self.ny));
        }
        self.j22.copy_from(&eval.dy_dp);
    }

    /// Entry `(i, j)` of the virtual dense Jacobian. Pure and read-only;
    /// meant for verification, not for bulk access.
    pub fn entry(&self, i: usize, j: usize) -> f64 {
        let split_rows = self.mx * self.nx;
        let split_cols = self.mx * self.nx;
        if i < split_rows {
            let (obs, r) = (i / self.nx, i % self.nx);
            if j < split_cols && j / self.nx == obs {
                self.j11[obs][(r, j % self.nx)]
            } else {
                0.0
            }
        } else {
            let k = i - split_rows;
            let (obs, r) = (k / self.ny, k % self.ny);
            if j < split_cols {
                if j / self.nx == obs {
                    self.j21[obs][(r, j % self.nx)]
                } else {
                    0.0
                }
            } else {
                self.j22[(k, j - split_cols)]
            }
        }
    }

    /// `out = J * v` for `v = [dx; p]`, without forming `J`.
    pub fn mul(&self, v: &DVector<f64>, out: &mut DVector<f64>) {
        let split = self.mx * self.nx;
        let v_p = v.rows(split, self.np);
        out.rows_mut(split, self.mx * self.ny)
            .gemv(1.0, &self.j22, &v_p, 0.0);
        for (i, (j11, j21)) in izip!(&self.j11, &self.j21).enumerate() {
            let v_i = v.rows(i * self.nx, self.nx);
            out.rows_mut(i * self.nx, self.nx).gemv(1.0, j11, &v_i, 0.0);
            out.rows_mut(split + i * self.ny, self.ny)
                .gemv(1.0, j21, &v_i, 1.0);
        }
    }

    /// `out = J^T * f` for a stacked residual `f`, without forming `J`.
    pub fn mul_transpose(&self, f: &DVector<f64>, out: &mut DVector<f64>) {
        let split = self.mx * self.nx;
        let f_tail = f.rows(split, self.mx * self.ny);
        out.rows_mut(split, self.np)
            .gemv_tr(1.0, &self.j22, &f_tail, 0.0);
        for (i, (j11, j21)) in izip!(&self.j11, &self.j21).enumerate() {
            let f1_i = f.rows(i * self.nx, self.nx);
            let f2_i = f.rows(split + i * self.ny, self.ny);
            let mut out_i = out.rows_mut(i * self.nx, self.nx);
            out_i.gemv_tr(1.0, j11, &f1_i, 0.0);
            out_i.gemv_tr(1.0, j21, &f2_i, 1.0);
        }
    }

    /// Exact column norms of the virtual dense `J`, written into `out`.
    pub fn column_norms(&self, out: &mut DVector<f64>) {
        for (i, (j11, j21)) in izip!(&self.j11, &self.j21).enumerate() {
            for k in 0..self.nx {
                out[i * self.nx + k] = enorm(&j11.column(k)).hypot(enorm(&j21.column(k)));
            }
        }
        let split = self.mx * self.nx;
        for j in 0..self.np {
            out[split + j] = enorm(&self.j22.column(j));
        }
    }
}
