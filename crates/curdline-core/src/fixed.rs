use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// All in-loop quantities (litres, kilograms, degrees C, pH, moisture
/// percentages) use this type so runs reproduce bit-for-bit across
/// platforms.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time (one virtual minute).
pub type Ticks = u64;

/// Convergence tolerance for iterative stage loops (1e-9 in Q32.32).
///
/// Fixed-point subtraction is exact, but targets produced by scaling
/// (e.g. moisture decay toward a setpoint) can land one ULP away from
/// the configured goal. Loops terminate when the residual falls within
/// this band.
pub const EPSILON: Fixed64 = Fixed64::from_bits(5);

/// Convert an f64 to Fixed64. Use only at configuration boundaries,
/// never in the sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display/export, never in the
/// sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Checked multiplication for Fixed64 that returns None on overflow.
#[inline]
pub fn checked_mul_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_mul(b)
}

/// Checked division for Fixed64 that returns None on zero divisor.
#[inline]
pub fn checked_div_64(a: Fixed64, b: Fixed64) -> Option<Fixed64> {
    a.checked_div(b)
}

/// True when `a` and `b` differ by at most [`EPSILON`].
#[inline]
pub fn approx_eq(a: Fixed64, b: Fixed64) -> bool {
    let d = if a >= b { a - b } else { b - a };
    d <= EPSILON
}
