//! Two-proportion significance tests.
//!
//! # Tests
//!
//! - **Pooled z-test** on `x1/n1` vs `x2/n2`, optionally with Yates'
//!   continuity correction.
//! - **Fisher's exact test** on the 2×2 table
//!   `[[x1, n1 - x1], [x2, n2 - x2]]`, two-sided by summing every table
//!   with the same margins that is no more likely than the observed one.
//!
//! P-values are two-sided. The z-score sign says which side is larger:
//! positive means the first proportion exceeds the second.

use serde::Serialize;

use tally_core::config::TestFamily;

/// Relative slack when comparing hypergeometric probabilities.
const FISHER_RELATIVE_EPSILON: f64 = 1e-7;

/// Which test produced a p-value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestUsed {
    ZTest,
    ZTestCorrected,
    FisherExact,
}

/// Outcome of comparing two proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProportionTest {
    pub z: f64,
    pub p_value: f64,
    pub test: TestUsed,
}

/// Compare `x1 / n1` against `x2 / n2` with the configured test family.
///
/// `exact_below` is the smallest 2×2 cell count for which the adaptive and
/// z-test families still trust the plain normal approximation.
#[must_use]
pub fn compare_proportions(
    x1: u32,
    n1: u32,
    x2: u32,
    n2: u32,
    family: TestFamily,
    exact_below: u32,
) -> ProportionTest {
    let small = min_cell(x1, n1, x2, n2) < exact_below;
    match family {
        TestFamily::FisherExact => fisher_test(x1, n1, x2, n2),
        TestFamily::Adaptive if small => fisher_test(x1, n1, x2, n2),
        TestFamily::ZTest if small => z_test(x1, n1, x2, n2, true),
        TestFamily::Adaptive | TestFamily::ZTest => z_test(x1, n1, x2, n2, false),
    }
}

fn min_cell(x1: u32, n1: u32, x2: u32, n2: u32) -> u32 {
    x1.min(n1.saturating_sub(x1))
        .min(x2)
        .min(n2.saturating_sub(x2))
}

fn fisher_test(x1: u32, n1: u32, x2: u32, n2: u32) -> ProportionTest {
    ProportionTest {
        z: pooled_z(x1, n1, x2, n2, false),
        p_value: fisher_exact_two_sided(x1, n1, x2, n2),
        test: TestUsed::FisherExact,
    }
}

fn z_test(x1: u32, n1: u32, x2: u32, n2: u32, corrected: bool) -> ProportionTest {
    let z = pooled_z(x1, n1, x2, n2, corrected);
    ProportionTest {
        z,
        p_value: two_sided_p(z),
        test: if corrected {
            TestUsed::ZTestCorrected
        } else {
            TestUsed::ZTest
        },
    }
}

/// Pooled two-proportion z statistic. Zero when either sample is empty or
/// the pooled variance vanishes.
#[must_use]
pub fn pooled_z(x1: u32, n1: u32, x2: u32, n2: u32, continuity: bool) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 0.0;
    }
    let (x1, n1, x2, n2) = (
        f64::from(x1),
        f64::from(n1),
        f64::from(x2),
        f64::from(n2),
    );
    let p1 = x1 / n1;
    let p2 = x2 / n2;
    let pooled = (x1 + x2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se <= 0.0 || !se.is_finite() {
        return 0.0;
    }

    let diff = p1 - p2;
    let adjusted = if continuity {
        let correction = 0.5 * (1.0 / n1 + 1.0 / n2);
        (diff.abs() - correction).max(0.0).copysign(diff)
    } else {
        diff
    };
    adjusted / se
}

/// Two-sided normal p-value for a z statistic.
#[must_use]
pub fn two_sided_p(z: f64) -> f64 {
    erfc(z.abs() / std::f64::consts::SQRT_2).clamp(0.0, 1.0)
}

/// Complementary error function, Chebyshev fit with fractional error below
/// 1.2e-7 everywhere.
#[must_use]
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / 0.5f64.mul_add(z, 1.0);
    let poly = t.mul_add(
        t.mul_add(
            t.mul_add(
                t.mul_add(
                    t.mul_add(
                        t.mul_add(
                            t.mul_add(
                                t.mul_add(t.mul_add(0.170_872_77, -0.822_152_23), 1.488_515_87),
                                -1.135_203_98,
                            ),
                            0.278_868_07,
                        ),
                        -0.186_288_06,
                    ),
                    0.096_784_18,
                ),
                0.374_091_96,
            ),
            1.000_023_68,
        ),
        -1.265_512_23,
    );
    let ans = t * (-z).mul_add(z, poly).exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// Natural log of the gamma function (Lanczos, g = 7).
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula.
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        #[allow(clippy::cast_precision_loss)]
        let offset = i as f64;
        acc += c / (x + offset);
    }
    let t = x + 7.5;
    0.5f64.mul_add((2.0 * std::f64::consts::PI).ln(), (x + 0.5) * t.ln()) - t + acc.ln()
}

fn ln_choose(n: u32, k: u32) -> f64 {
    if k > n {
        return f64::NEG_INFINITY;
    }
    let (n, k) = (f64::from(n), f64::from(k));
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Two-sided Fisher's exact test p-value.
#[must_use]
pub fn fisher_exact_two_sided(x1: u32, n1: u32, x2: u32, n2: u32) -> f64 {
    let x1 = x1.min(n1);
    let x2 = x2.min(n2);
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }

    let total = n1 + n2;
    let successes = x1 + x2;
    let ln_denominator = ln_choose(total, successes);
    let ln_prob = |a: u32| ln_choose(n1, a) + ln_choose(n2, successes - a) - ln_denominator;

    let lo = successes.saturating_sub(n2);
    let hi = successes.min(n1);
    let observed = ln_prob(x1);
    let threshold = observed + FISHER_RELATIVE_EPSILON.ln_1p();

    let p: f64 = (lo..=hi)
        .map(ln_prob)
        .filter(|&lp| lp <= threshold)
        .map(f64::exp)
        .sum();
    p.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
