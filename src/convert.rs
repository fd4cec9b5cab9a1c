//! Checked numeric narrowing

use num_traits::{NumCast, ToPrimitive};
use std::fmt::Display;

use crate::error::RangeError;

/// Convert `value` to `U`, failing when it does not fit.
///
/// ```
/// use lumen::convert::narrow;
///
/// assert_eq!(narrow::<i64, u8>(200).unwrap(), 200u8);
/// assert!(narrow::<i64, u8>(300).is_err());
/// ```
pub fn narrow<T, U>(value: T) -> Result<U, RangeError>
where
    T: ToPrimitive + Display + Copy,
    U: NumCast,
{
    U::from(value).ok_or_else(|| RangeError {
        value: value.to_string(),
        target: std::any::type_name::<U>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range() {
        assert_eq!(narrow::<u64, u32>(7).unwrap(), 7);
        assert_eq!(narrow::<i32, i8>(-128).unwrap(), -128);
        assert_eq!(narrow::<usize, u16>(u16::MAX as usize).unwrap(), u16::MAX);
    }

    #[test]
    fn test_out_of_range() {
        let err = narrow::<i64, u32>(-1).unwrap_err();
        assert_eq!(err.value, "-1");
        assert_eq!(err.target, "u32");
        assert_eq!(err.to_string(), "value -1 does not fit in u32");

        assert!(narrow::<u64, i32>(u64::MAX).is_err());
    }

    #[test]
    fn test_float_to_int() {
        assert_eq!(narrow::<f64, u8>(12.0).unwrap(), 12);
        assert!(narrow::<f64, u8>(f64::NAN).is_err());
        assert!(narrow::<f64, i16>(1e9).is_err());
    }
}
