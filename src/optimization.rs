use ndarray::{arr1, s, Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

use linfa::prelude::Float;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Starting points for multistart optimization: row 0 is the current
/// hyperparameter vector, the remaining `n_start` rows perturb it with
/// uniform offsets in [-2, 2] clipped to the bounds. A seed makes the
/// restarts reproducible.
pub(crate) fn prepare_multistart(
    n_start: usize,
    x0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: Option<u64>,
) -> Array2<f64> {
    let mut starts = Array2::zeros((n_start + 1, x0.len()));
    starts.row_mut(0).assign(x0);
    let mut rng = match seed {
        Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
        None => Xoshiro256Plus::from_entropy(),
    };
    for mut row in starts.slice_mut(s![1.., ..]).rows_mut() {
        for (j, v) in row.iter_mut().enumerate() {
            let offset: f64 = rng.gen_range(-2.0..2.0);
            *v = (x0[j] + offset).clamp(bounds[j].0, bounds[j].1);
        }
    }
    starts
}

/// Optimize GP hyperparameters given an initial guess and bounds with cobyla
pub(crate) fn optimize_params<ObjF>(
    objfn: ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>, bool)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
{
    use cobyla::{minimize, Func, StopTols, SuccessStatus};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.to_vec();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((status, x_opt, fval)) => {
            let params_opt = arr1(&x_opt);
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            // exhausting the budget keeps the point but does not count
            // as convergence
            let converged = !matches!(
                status,
                SuccessStatus::MaxEvalReached | SuccessStatus::MaxTimeReached
            );
            (fval, params_opt, converged)
        }
        Err((status, x_opt, _)) => {
            log::warn!("Cobyla optimizer failed with status={status:?}");
            let fval = objfn(&x_opt, None, &mut ());
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, arr1(&x_opt), false)
        }
    }
}

#[inline(always)]
pub(crate) fn into_f64<F: Float>(v: &F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}
