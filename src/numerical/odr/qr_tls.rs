//! Structure-exploiting factorization of the scaled TLS Jacobian and the
//! damped linear least squares solves built on top of it.
//!
//! The scaled Jacobian `A = J * D^-1` keeps the block shape of `J`: a
//! block-diagonal `[A11; A21]` stack over observations next to a dense
//! parameter block. `factorize` reduces it in O(MX) work to per-observation
//! triangles plus one small `(MX*NY)×NP` pivoted QR problem; `solve` then
//! produces the (optionally Levenberg-Marquardt damped) step for any `λ`
//! without touching the large blocks again.
#![allow(clippy::excessive_precision)]

use crate::numerical::odr::jacobian_tls::BlockJacobian;
use crate::numerical::odr::utils::{dot, enorm, epsmch};
use log::debug;
use nalgebra::{DMatrix, DVector};

/// MINPACK-style Givens parameters `(sin, cos)` eliminating `b` against `a`.
#[inline]
fn givens(a: f64, b: f64) -> (f64, f64) {
    if a.abs() < b.abs() {
        let cot = a / b;
        let sin = 0.5 / (0.25 + 0.25 * (cot * cot)).sqrt();
        (sin, sin * cot)
    } else {
        let tan = b / a;
        let cos = 0.5 / (0.25 + 0.25 * (tan * tan)).sqrt();
        (cos * tan, cos)
    }
}

/// Factorization workspace for the structured least squares problem
///
///   min_u || [A11  0 ; A21  A22] * u + F0_scaled ||
///
/// sized once from the problem dimensions and reused across iterations.
#[derive(Debug, Clone)]
pub struct TlsFactors {
    mx: usize,
    nx: usize,
    ny: usize,
    np: usize,
    /// Per-observation upper triangles of the rotated `[A11; A21]` stack.
    r11: Vec<DMatrix<f64>>,
    /// Per-observation `NX×NP` fill produced by the same rotations.
    e12: Vec<DMatrix<f64>>,
    /// Rotated right hand side, data-correction rows.
    u1: DVector<f64>,
    /// Pivoted QR storage of the reduced parameter system, zero-padded to
    /// square when the system is wide. Householder vectors below, `R` above,
    /// diagonal written back after the rhs has been rotated.
    qr: DMatrix<f64>,
    r_diag: DVector<f64>,
    perm: Vec<usize>,
    norms_work: DVector<f64>,
    /// First `NP` entries of `Q^T` times the reduced right hand side.
    qt_v: DVector<f64>,
    v2: DVector<f64>,
    /// Numerical rank of the reduced parameter block.
    rank_p: usize,
    /// Right orthogonal factor trimming the beyond-rank columns; identity
    /// when the reduced block has full rank. Acts on parameter space only,
    /// the per-observation structure is untouched.
    cod_v: DMatrix<f64>,
    h: DVector<f64>,
    // per-solve scratch: eliminated triangle in transposed-lower storage
    s: DMatrix<f64>,
    s_diag: DVector<f64>,
    diag_save: DVector<f64>,
    rhs: DVector<f64>,
    zp: DVector<f64>,
    y: DVector<f64>,
    dz: DVector<f64>,
    u: DVector<f64>,
    du: DVector<f64>,
    w: DMatrix<f64>,
    wb: DVector<f64>,
}

impl TlsFactors {
    pub fn new(mx: usize, nx: usize, ny: usize, np: usize) -> Self {
        let qr_rows = (mx * ny).max(np);
        Self {
            mx,
            nx,
            ny,
            np,
            r11: (0..mx).map(|_| DMatrix::zeros(nx, nx)).collect(),
            e12: (0..mx).map(|_| DMatrix::zeros(nx, np)).collect(),
            u1: DVector::zeros(mx * nx),
            qr: DMatrix::zeros(qr_rows, np),
            r_diag: DVector::zeros(np),
            perm: (0..np).collect(),
            norms_work: DVector::zeros(np),
            qt_v: DVector::zeros(np),
            v2: DVector::zeros(qr_rows),
            rank_p: 0,
            cod_v: DMatrix::identity(np, np),
            h: DVector::zeros(np + 1),
            s: DMatrix::zeros(np, np),
            s_diag: DVector::zeros(np),
            diag_save: DVector::zeros(np),
            rhs: DVector::zeros(np),
            zp: DVector::zeros(np),
            y: DVector::zeros(np),
            dz: DVector::zeros(np),
            u: DVector::zeros(mx * nx + np),
            du: DVector::zeros(mx * nx + np),
            w: DMatrix::zeros(nx + ny, nx + np),
            wb: DVector::zeros(nx + ny),
        }
    }

    /// Total numerical rank of the scaled Jacobian: the data-correction block
    /// contributes its full `MX*NX` (identity sub-blocks at real base points),
    /// the reduced parameter block its pivoted-QR rank.
    pub fn rank(&self) -> usize {
        self.mx * self.nx + self.rank_p
    }

    pub(crate) fn rank_p(&self) -> usize {
        self.rank_p
    }

    /// Factorize the column-scaled Jacobian. `f0` is the residual at the base
    /// point, `d` the scaling diagonal; columns with `d = 0` are left
    /// unscaled (they are identically zero). The inputs are read-only and the
    /// right hand side carries `-F0`, so solves yield the step directly.
    pub fn factorize(&mut self, jac: &BlockJacobian, f0: &DVector<f64>, d: &DVector<f64>) {
        let (mx, nx, ny, np) = (self.mx, self.nx, self.ny, self.np);
        let split = mx * nx;
        let m2 = mx * ny;

        // stage 1: per-observation Givens elimination of the [A11; A21] stack,
        // rotations propagate into the parameter columns and the rhs
        for i in 0..mx {
            for k in 0..nx {
                let dk = d[i * nx + k];
                let scale = if dk != 0.0 { 1.0 / dk } else { 1.0 };
                for r in 0..nx {
                    self.w[(r, k)] = jac.j11[i][(r, k)] * scale;
                }
                for r in 0..ny {
                    self.w[(nx + r, k)] = jac.j21[i][(r, k)] * scale;
                }
            }
            for j in 0..np {
                let dj = d[split + j];
                let scale = if dj != 0.0 { 1.0 / dj } else { 1.0 };
                for r in 0..nx {
                    self.w[(r, nx + j)] = 0.0;
                }
                for r in 0..ny {
                    self.w[(nx + r, nx + j)] = jac.j22[(i * ny + r, j)] * scale;
                }
            }
            for r in 0..nx {
                self.wb[r] = -f0[i * nx + r];
            }
            for r in 0..ny {
                self.wb[nx + r] = -f0[split + i * ny + r];
            }

            for k in 0..nx {
                for r in (k + 1)..(nx + ny) {
                    if self.w[(r, k)] == 0.0 {
                        continue;
                    }
                    let (sin, cos) = givens(self.w[(k, k)], self.w[(r, k)]);
                    for j in k..(nx + np) {
                        let temp = cos * self.w[(k, j)] + sin * self.w[(r, j)];
                        self.w[(r, j)] = -sin * self.w[(k, j)] + cos * self.w[(r, j)];
                        self.w[(k, j)] = temp;
                    }
                    let temp = cos * self.wb[k] + sin * self.wb[r];
                    self.wb[r] = -sin * self.wb[k] + cos * self.wb[r];
                    self.wb[k] = temp;
                    self.w[(r, k)] = 0.0;
                }
            }

            for r in 0..nx {
                for c in 0..nx {
                    self.r11[i][(r, c)] = if c >= r { self.w[(r, c)] } else { 0.0 };
                }
                self.u1[i * nx + r] = self.wb[r];
            }
            self.e12[i].copy_from(&self.w.view((0, nx), (nx, np)));
            for r in 0..ny {
                for j in 0..np {
                    self.qr[(i * ny + r, j)] = self.w[(nx + r, nx + j)];
                }
                self.v2[i * ny + r] = self.wb[nx + r];
            }
        }
        // zero-pad when the reduced system is wide
        for r in m2..self.qr.nrows() {
            for j in 0..np {
                self.qr[(r, j)] = 0.0;
            }
            self.v2[r] = 0.0;
        }

        // stage 2: Householder QR with column pivoting of the reduced block
        for j in 0..np {
            self.norms_work[j] = enorm(&self.qr.column(j));
            self.r_diag[j] = self.norms_work[j];
            self.perm[j] = j;
        }
        for j in 0..np {
            // pivot
            let kmax = self.r_diag.view_range(j.., ..).imax() + j;
            if kmax != j {
                self.qr.swap_columns(j, kmax);
                self.perm.swap(j, kmax);
                self.r_diag[kmax] = self.r_diag[j];
                self.norms_work[kmax] = self.norms_work[j];
            }

            // compute Householder reflection vector w_j to
            // reduce the j-th column
            let mut lower = self.qr.rows_range_mut(j..);
            let (left, mut right) = lower.columns_range_pair_mut(j, j + 1..);
            let w_j = {
                let mut axis = left;
                let mut aj_norm = enorm(&axis);
                if aj_norm == 0.0 {
                    self.r_diag[j] = 0.0;
                    continue;
                }
                if axis[0] < 0.0 {
                    aj_norm = -aj_norm;
                }
                self.r_diag[j] = -aj_norm;
                axis /= aj_norm;
                axis[0] += 1.0;
                axis
            };

            // apply reflection to remaining columns and downdate the
            // partial column norms, see "Lapack Working Note 176"
            for (k, mut col) in right.column_iter_mut().enumerate() {
                let k = k + j + 1;
                col.axpy(-(dot(&col, &w_j) / w_j[0]), &w_j, 1.0);

                if self.r_diag[k] == 0.0 {
                    continue;
                }
                let r_diagk = &mut self.r_diag[k];
                *r_diagk *= {
                    let temp = (col[0] / *r_diagk).powi(2);
                    (1.0 - temp).max(0.0).sqrt()
                };
                let z05 = 0.05;
                if z05 * (*r_diagk / self.norms_work[k]).powi(2) <= epsmch() {
                    *r_diagk = enorm(&col.view_range(1.., ..));
                    self.norms_work[k] = *r_diagk;
                }
            }
        }

        // rotate the reduced rhs with the stored reflections, then write the
        // diagonal of R back into the packed storage
        for j in 0..np {
            if self.qr[(j, j)] != 0.0 {
                let temp = -dot(&self.v2.rows_range(j..), &self.qr.view_range(j.., j))
                    / self.qr[(j, j)];
                self.v2
                    .rows_range_mut(j..)
                    .axpy(temp, &self.qr.view_range(j.., j), 1.0);
            }
            self.qt_v[j] = self.v2[j];
        }
        for j in 0..np {
            self.qr[(j, j)] = self.r_diag[j];
        }

        // numerical rank from a relative diagonal tolerance
        let tol = epsmch() * (self.qr.nrows() as f64) * self.r_diag[0].abs();
        self.rank_p = (0..np)
            .position(|j| self.r_diag[j].abs() <= tol)
            .unwrap_or(np);

        // trim beyond-rank columns with right Householder reflections,
        // accumulated into the parameter-space factor V
        self.cod_v.fill_with_identity();
        if self.rank_p < np {
            debug!(
                "reduced parameter block is rank deficient: rank {} of {}",
                self.rank_p, np
            );
            let rank = self.rank_p;
            let t = np - rank;
            for k in (0..rank).rev() {
                self.h[0] = self.qr[(k, k)];
                for c in 0..t {
                    self.h[1 + c] = self.qr[(k, rank + c)];
                }
                let mut hnorm = enorm(&self.h.rows(0, 1 + t));
                if hnorm == 0.0 {
                    continue;
                }
                if self.h[0] < 0.0 {
                    hnorm = -hnorm;
                }
                for c in 0..=t {
                    self.h[c] /= hnorm;
                }
                self.h[0] += 1.0;

                // the generating row maps onto the new diagonal entry
                self.qr[(k, k)] = -hnorm;
                for c in 0..t {
                    self.qr[(k, rank + c)] = 0.0;
                }
                // rows below k have zeros in all touched columns already
                for i in 0..k {
                    let mut sum = self.qr[(i, k)] * self.h[0];
                    for c in 0..t {
                        sum += self.qr[(i, rank + c)] * self.h[1 + c];
                    }
                    let factor = sum / self.h[0];
                    self.qr[(i, k)] -= factor * self.h[0];
                    for c in 0..t {
                        self.qr[(i, rank + c)] -= factor * self.h[1 + c];
                    }
                }
                for i in 0..np {
                    let mut sum = self.cod_v[(i, k)] * self.h[0];
                    for c in 0..t {
                        sum += self.cod_v[(i, rank + c)] * self.h[1 + c];
                    }
                    let factor = sum / self.h[0];
                    self.cod_v[(i, k)] -= factor * self.h[0];
                    for c in 0..t {
                        self.cod_v[(i, rank + c)] -= factor * self.h[1 + c];
                    }
                }
            }
        }
    }

    /// Solve for the step at damping `lambda >= 0` and unscale it into
    /// `step`. Returns `(||D*step||, d||D*step||/dλ)`; the pair drives a
    /// Hebden-style search for the trust region radius in the outer loop.
    ///
    /// `lambda = 0` runs the identical code path and yields the plain
    /// rank-revealing Newton step with beyond-rank components zeroed.
    pub fn solve(&mut self, lambda: f64, d: &DVector<f64>, step: &mut DVector<f64>) -> (f64, f64) {
        let (mx, nx, np) = (self.mx, self.nx, self.np);
        let split = mx * nx;
        let rank = self.rank_p;
        let sqrt_lambda = lambda.sqrt();

        // mirror the rank triangle, lower part will be overwritten with the
        // transposed eliminated triangle S
        for i in 0..rank {
            for j in 0..rank {
                self.s[(i, j)] = if j >= i {
                    self.qr[(i, j)]
                } else {
                    self.qr[(j, i)]
                };
            }
            self.rhs[i] = self.qt_v[i];
            self.diag_save[i] = self.s[(i, i)];
        }

        // eliminate the damping diagonal with Givens rotations; the damping
        // is isotropic in the rotated scaled parameter coordinates, so it is
        // the same scalar for every column
        for j in 0..rank {
            if sqrt_lambda != 0.0 {
                self.s_diag[j] = sqrt_lambda;
                for i in (j + 1)..rank {
                    self.s_diag[i] = 0.0;
                }
                let mut qtbpj = 0.0;
                for k in j..rank {
                    if self.s_diag[k] != 0.0 {
                        let s_kk = self.s[(k, k)];
                        let (sin, cos) = givens(s_kk, self.s_diag[k]);

                        self.s[(k, k)] = cos * s_kk + sin * self.s_diag[k];
                        let temp = cos * self.rhs[k] + sin * qtbpj;
                        qtbpj = -sin * self.rhs[k] + cos * qtbpj;
                        self.rhs[k] = temp;

                        for i in (k + 1)..rank {
                            let s_ik = self.s[(i, k)];
                            let temp = cos * s_ik + sin * self.s_diag[i];
                            self.s_diag[i] = -sin * s_ik + cos * self.s_diag[i];
                            self.s[(i, k)] = temp;
                        }
                    }
                }
            }
            self.s_diag[j] = self.s[(j, j)];
            self.s[(j, j)] = self.diag_save[j];
        }

        // backward solve S * z = rhs, zero-filling past any zero pivot
        let nsing = (0..rank)
            .position(|j| self.s_diag[j] == 0.0)
            .unwrap_or(rank);
        for j in nsing..rank {
            self.rhs[j] = 0.0;
        }
        for j in (0..nsing).rev() {
            let mut sum = 0.0;
            for i in (j + 1)..nsing {
                sum += self.s[(i, j)] * self.rhs[i];
            }
            self.rhs[j] = (self.rhs[j] - sum) / self.s_diag[j];
        }

        // rotate back through V, undo the pivoting
        for j in 0..np {
            self.zp[j] = if j < rank { self.rhs[j] } else { 0.0 };
        }
        if rank < np {
            self.y.gemv(1.0, &self.cod_v, &self.zp, 0.0);
        } else {
            self.y.copy_from(&self.zp);
        }
        for j in 0..np {
            self.u[split + self.perm[j]] = self.y[j];
        }

        // per-observation back-substitution for the data-correction part
        for i in 0..mx {
            for r in 0..nx {
                let mut t = self.u1[i * nx + r];
                for j in 0..np {
                    t -= self.e12[i][(r, j)] * self.u[split + j];
                }
                self.wb[r] = t;
            }
            for r in (0..nx).rev() {
                let mut t = self.wb[r];
                for c in (r + 1)..nx {
                    t -= self.r11[i][(r, c)] * self.u[i * nx + c];
                }
                self.u[i * nx + r] = if self.r11[i][(r, r)] != 0.0 {
                    t / self.r11[i][(r, r)]
                } else {
                    0.0
                };
            }
        }

        let r_norm = enorm(&self.u);

        // dz = -(S^T S)^-1 z, two triangular solves against the eliminated
        // triangle, then the same rotate-back and back-substitution
        for i in 0..rank {
            let mut t = self.rhs[i];
            for j in 0..i {
                t -= self.s[(i, j)] * self.dz[j];
            }
            self.dz[i] = if self.s_diag[i] != 0.0 {
                t / self.s_diag[i]
            } else {
                0.0
            };
        }
        for i in (0..rank).rev() {
            // the negation is folded in, entries above i already hold -x
            let mut t = -self.dz[i];
            for j in (i + 1)..rank {
                t -= self.s[(j, i)] * self.dz[j];
            }
            self.dz[i] = if self.s_diag[i] != 0.0 {
                t / self.s_diag[i]
            } else {
                0.0
            };
        }

        for j in 0..np {
            self.zp[j] = if j < rank { self.dz[j] } else { 0.0 };
        }
        if rank < np {
            self.y.gemv(1.0, &self.cod_v, &self.zp, 0.0);
        } else {
            self.y.copy_from(&self.zp);
        }
        for j in 0..np {
            self.du[split + self.perm[j]] = self.y[j];
        }
        for i in 0..mx {
            for r in 0..nx {
                let mut t = 0.0;
                for j in 0..np {
                    t -= self.e12[i][(r, j)] * self.du[split + j];
                }
                self.wb[r] = t;
            }
            for r in (0..nx).rev() {
                let mut t = self.wb[r];
                for c in (r + 1)..nx {
                    t -= self.r11[i][(r, c)] * self.du[i * nx + c];
                }
                self.du[i * nx + r] = if self.r11[i][(r, r)] != 0.0 {
                    t / self.r11[i][(r, r)]
                } else {
                    0.0
                };
            }
        }

        let dr_norm = if r_norm != 0.0 {
            dot(&self.u, &self.du) / r_norm
        } else {
            0.0
        };

        // unscale; components of identically zero columns stay exactly zero
        for j in 0..self.u.nrows() {
            step[j] = if d[j] != 0.0 { self.u[j] / d[j] } else { 0.0 };
        }

        (r_norm, dr_norm)
    }
}
