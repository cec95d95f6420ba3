// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling macros.
//!
//! Both macros convert their error value with `Into`, so callers pick the
//! concrete error type through the function signature.

/// Early return with an error.
///
/// # Example
///
/// ```
/// use pyreg_macros::bail;
///
/// fn register(index: i64) -> Result<u32, String> {
///     if index < 0 {
///         bail!("negative register {}", index);
///     }
///     Ok(index as u32)
/// }
///
/// assert!(register(-1).is_err());
/// assert_eq!(register(3), Ok(3));
/// ```
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err(::core::convert::Into::into(format!($msg)))
    };
    ($fmt:literal, $($arg:tt)*) => {
        return Err(::core::convert::Into::into(format!($fmt, $($arg)*)))
    };
    ($err:expr $(,)?) => {
        return Err(::core::convert::Into::into($err))
    };
}

/// Check an invariant, returning an error instead of panicking.
///
/// # Example
///
/// ```
/// use pyreg_macros::ensure;
///
/// fn release(next: u32, reg: u32) -> Result<u32, String> {
///     ensure!(next == reg + 1, "register {} released out of order", reg);
///     Ok(reg)
/// }
///
/// assert_eq!(release(5, 4), Ok(4));
/// assert!(release(5, 2).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            $crate::bail!($msg);
        }
    };
    ($cond:expr, $fmt:literal, $($arg:tt)*) => {
        if !$cond {
            $crate::bail!($fmt, $($arg)*);
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            $crate::bail!($err);
        }
    };
}
