use nalgebra::{Dim, U1, Vector, storage::Storage};

// Helpers shared by the TLS solver modules. MINPACK lineage, specialized to
// f64 since nothing in this family is generic over the scalar type.

#[inline]
pub(crate) fn epsmch() -> f64 {
    f64::EPSILON
}

#[inline]
pub(crate) fn giant() -> f64 {
    f64::MAX
}

#[inline]
pub(crate) fn dwarf() -> f64 {
    f64::MIN_POSITIVE
}

/// Overflow/underflow-safe Euclidean norm, MINPACK ENORM with its
/// three-accumulator split for large, ordinary and small components.
#[inline]
pub(crate) fn enorm<N, VS>(v: &Vector<f64, N, VS>) -> f64
where
    N: Dim,
    VS: Storage<f64, N, U1>,
{
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    let mut s3 = 0.0;
    let mut x1max = 0.0;
    let mut x3max = 0.0;
    let agiant = giant().sqrt() / (v.nrows() as f64);
    let rdwarf = dwarf().sqrt();
    for xi in v.iter() {
        let xabs = xi.abs();
        if xabs.is_nan() {
            return xabs;
        }
        if xabs >= agiant || xabs <= rdwarf {
            if xabs > rdwarf {
                // sum for large components
                if xabs > x1max {
                    s1 = 1.0 + s1 * (x1max / xabs).powi(2);
                    x1max = xabs;
                } else {
                    s1 += (xabs / x1max).powi(2);
                }
            } else {
                // sum for small components
                if xabs > x3max {
                    s3 = 1.0 + s3 * (x3max / xabs).powi(2);
                    x3max = xabs;
                } else if xabs != 0.0 {
                    s3 += (xabs / x3max).powi(2);
                }
            }
        } else {
            s2 += xabs * xabs;
        }
    }

    if s1 != 0.0 {
        x1max * (s1 + (s2 / x1max) / x1max).sqrt()
    } else if s2 != 0.0 {
        if s2 >= x3max {
            (s2 * (1.0 + (x3max / s2) * (x3max * s3))).sqrt()
        } else {
            (x3max * ((s2 / x3max) + (x3max * s3))).sqrt()
        }
    } else {
        x3max * s3.sqrt()
    }
}

#[inline]
/// Dot product between two vectors
pub(crate) fn dot<N, AS, BS>(a: &Vector<f64, N, AS>, b: &Vector<f64, N, BS>) -> f64
where
    N: Dim,
    AS: Storage<f64, N, U1>,
    BS: Storage<f64, N, U1>,
{
    // To achieve floating point equality with MINPACK
    // the dot product implementation from nalgebra must not
    // be used.
    let mut dot = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x * *y;
    }
    dot
}
