//! 24.8 signed fixed-point numbers

use std::fmt;

/// Signed 24.8 fixed-point value as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fixed(pub i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    /// Nearest representable value; saturates outside the 24-bit range
    pub fn from_f64(value: f64) -> Self {
        Fixed((value * 256.0).round() as i32)
    }

    pub fn from_int(value: i32) -> Self {
        Fixed(value.wrapping_mul(256))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / 256.0
    }

    /// Integer part, rounded toward zero
    pub fn to_int(self) -> i32 {
        self.0 / 256
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_fractions() {
        assert_eq!(Fixed::from_f64(1.0).raw(), 256);
        assert_eq!(Fixed::from_f64(-1.5).raw(), -384);
        assert_eq!(Fixed::from_f64(1.0 / 256.0).raw(), 1);
        assert_eq!(Fixed(1).to_f64(), 1.0 / 256.0);
        assert_eq!(Fixed(-1).to_f64(), -1.0 / 256.0);
        assert_eq!(Fixed::from_f64(Fixed(12345).to_f64()), Fixed(12345));
    }

    #[test]
    fn test_rounding() {
        // 0.3 * 256 = 76.8
        assert_eq!(Fixed::from_f64(0.3).raw(), 77);
        assert_eq!(Fixed::from_f64(-0.3).raw(), -77);
    }

    #[test]
    fn test_integers() {
        assert_eq!(Fixed::from_int(5).to_f64(), 5.0);
        assert_eq!(Fixed::from_int(-7).to_int(), -7);
        assert_eq!(Fixed::from_f64(2.75).to_int(), 2);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(Fixed(i32::MAX).to_f64(), 8388607.99609375);
        assert_eq!(Fixed(i32::MIN).to_f64(), -8388608.0);
        assert_eq!(Fixed::from_f64(-8388608.0), Fixed(i32::MIN));
    }
}
