/// errors-in-variables (total least squares / orthogonal distance regression)
/// solver family: structured Jacobian, rank-revealing Newton steps, trust region bookkeeping
pub mod odr;
