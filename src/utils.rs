/// Numerically stable base-2 log-sum-exp of two log-domain terms.
///
/// Returns negative infinity only when both terms are negative infinity.
#[inline(always)]
pub fn log2_sum_exp(a: f64, b: f64) -> f64 {
    let largest = a.max(b);
    if largest == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    largest + ((a - largest).exp2() + (b - largest).exp2()).log2()
}

/// Log2 PMF of the geometric distribution over sizes `n >= 1` with stop rate
/// `p`: `(n-1)·log2(1-p) + log2(p)`.
#[inline(always)]
pub fn geometric_log2_prob(n: usize, p: f64) -> f64 {
    (n as f64 - 1.0) * (1.0 - p).log2() + p.log2()
}
