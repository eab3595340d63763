use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};

/// Squared Euclidean distances between the columns of `x1` (nx, n1) and
/// `x2` (nx, n2), optionally weighted per dimension by `1 / lengths[d]^2`.
/// Returns an (n1, n2) matrix.
/// *Panics* if `x1` and `x2` have different row numbers.
pub(crate) fn scaled_sq_dists<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    lengths: &[F],
) -> Array2<F> {
    assert!(x1.nrows() == x2.nrows());
    let (nx, n1, n2) = (x1.nrows(), x1.ncols(), x2.ncols());
    let mut d = Array2::zeros((n1, n2));
    for i in 0..n1 {
        for j in 0..n2 {
            let mut acc = F::zero();
            for k in 0..nx {
                let ell = if lengths.len() == 1 {
                    lengths[0]
                } else {
                    lengths[k]
                };
                let diff = (x1[[k, i]] - x2[[k, j]]) / ell;
                acc = acc + diff * diff;
            }
            d[[i, j]] = acc;
        }
    }
    d
}

/// Squared differences along a single input dimension `dim`, (n1, n2) matrix.
pub(crate) fn dim_sq_diffs<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    dim: usize,
) -> Array2<F> {
    let (n1, n2) = (x1.ncols(), x2.ncols());
    let mut d = Array2::zeros((n1, n2));
    for i in 0..n1 {
        for j in 0..n2 {
            let diff = x1[[dim, i]] - x2[[dim, j]];
            d[[i, j]] = diff * diff;
        }
    }
    d
}

/// Gram matrix of inner products between columns, (n1, n2).
pub(crate) fn gram<F: Float>(
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x1.nrows() == x2.nrows());
    x1.t().dot(x2)
}

/// Whether two sample columns of `x` coincide exactly.
pub(crate) fn has_duplicate_columns<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> bool {
    let n = x.ncols();
    for i in 0..n {
        for j in (i + 1)..n {
            if x.column(i)
                .iter()
                .zip(x.column(j).iter())
                .all(|(a, b)| *a == *b)
            {
                return true;
            }
        }
    }
    false
}
