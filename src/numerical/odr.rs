/// structured Jacobian of the stacked total least squares residual and block-aware products
pub mod jacobian_tls;
/// user-facing problem trait for errors-in-variables regression and the error taxonomy
pub mod problem_tls;
/// structure-exploiting rank-revealing factorization and the damped linear least squares solves
pub mod qr_tls;
/// trust region solver core: loss, gradient, Newton / regularized / Cauchy steps, trial moves
pub mod solver_tls;
/// some utility functions shared by the total least squares solver modules
pub mod utils;
