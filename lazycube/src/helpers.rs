use num_traits::{Num, ToPrimitive};
use std::fmt::Debug;

/// Make sure bounds are ordered correctly, eg end comes after start.
///
pub fn rearrange<N>(lower: N, upper: N) -> (N, N)
where
    N: Num + Debug + PartialOrd,
{
    if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    }
}

/// Ratio of two lengths as a float, for rescaling coordinate steps.
///
pub(crate) fn ratio<N>(numerator: N, denominator: N) -> f64
where
    N: ToPrimitive,
{
    let numerator = numerator.to_f64().unwrap_or(f64::NAN);
    let denominator = denominator.to_f64().unwrap_or(f64::NAN);

    numerator / denominator
}
