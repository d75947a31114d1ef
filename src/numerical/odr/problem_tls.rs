use nalgebra::{DMatrix, DVector};

/// An errors-in-variables (total least squares) regression problem.
///
/// The model owns its measured outputs and returns residuals together with
/// both Jacobians in one call, because for orthogonal distance regression the
/// solver re-evaluates all three at every trial point anyway.
pub trait TotalLeastSquaresProblem {
    /// Number of input coordinates per observation, `NX`.
    fn num_inputs(&self) -> usize;

    /// Number of output coordinates per observation, `NY`.
    fn num_outputs(&self) -> usize;

    /// Number of model parameters, `NP`.
    fn num_params(&self) -> usize;

    /// Evaluate the residuals `f(p, x) - y` and their derivatives at the
    /// parameters `p` and the corrected inputs `x` (one observation per row).
    ///
    /// Return `None` if the model cannot be evaluated there.
    fn fgg(&self, p: &DVector<f64>, x: &DMatrix<f64>) -> Option<TlsEvaluation>;
}

/// One model evaluation: residuals plus both Jacobians.
#[derive(Debug, Clone)]
pub struct TlsEvaluation {
    /// Residuals `f(p, x) - y`, length `MX*NY`, observation-major.
    pub dy: DVector<f64>,
    /// Jacobian of the residuals with respect to the parameters, `(MX*NY)×NP`.
    pub dy_dp: DMatrix<f64>,
    /// Jacobian with respect to the inputs of the own observation, `(MX*NY)×NX`.
    /// Row block `i` holds `∂f_i/∂x_i`; residuals of one observation do not
    /// depend on the inputs of another.
    pub dy_dx: DMatrix<f64>,
}

/// Failures surfaced by the TLS solver.
#[derive(PartialEq, Eq, Debug)]
pub enum TlsError {
    /// The dimensions of the problem or of a supplied vector are wrong.
    InvalidInput(&'static str),
    /// The residual or Jacobian computation was not successful, it returned `None`.
    User(&'static str),
    /// Encountered `NaN` or `inf`.
    Numerical(&'static str),
}

impl TlsError {
    /// A fundamental assumption was not met, e.g. mismatched dimensions.
    pub fn was_usage_issue(&self) -> bool {
        matches!(self, TlsError::InvalidInput(_))
    }
}

/// Check one evaluation against the declared problem dimensions.
pub(crate) fn check_evaluation(
    eval: &TlsEvaluation,
    mx: usize,
    nx: usize,
    ny: usize,
    np: usize,
) -> Result<(), TlsError> {
    if eval.dy.nrows() != mx * ny {
        return Err(TlsError::InvalidInput("dy"));
    }
    if eval.dy_dp.nrows() != mx * ny || eval.dy_dp.ncols() != np {
        return Err(TlsError::InvalidInput("dy_dp"));
    }
    if eval.dy_dx.nrows() != mx * ny || eval.dy_dx.ncols() != nx {
        return Err(TlsError::InvalidInput("dy_dx"));
    }
    Ok(())
}
