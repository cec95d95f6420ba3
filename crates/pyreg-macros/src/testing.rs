// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Testing helper macros.

/// Assert that an expression matches a pattern.
///
/// # Example
///
/// ```
/// use pyreg_macros::assert_matches;
///
/// let access: Result<u32, String> = Ok(3);
/// assert_matches!(access, Ok(reg) if reg < 4);
/// ```
#[macro_export]
macro_rules! assert_matches {
    ($expr:expr, $pat:pat $(if $guard:expr)? $(,)?) => {
        match $expr {
            $pat $(if $guard)? => {}
            ref other => panic!(
                "assertion failed: `{}` does not match `{}`\n  value: {:?}",
                stringify!($expr),
                stringify!($pat $(if $guard)?),
                other
            ),
        }
    };
}

/// Assert that a Result is Ok and return the value.
///
/// # Example
///
/// ```
/// use pyreg_macros::assert_ok;
///
/// let parsed: Result<u8, std::num::ParseIntError> = "42".parse();
/// assert_eq!(assert_ok!(parsed), 42);
/// ```
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => panic!(
                "assertion failed: `{}` returned Err\n  error: {}",
                stringify!($expr),
                err
            ),
        }
    };
}

/// Assert that a Result is Err and return the error.
///
/// # Example
///
/// ```
/// use pyreg_macros::assert_err;
///
/// let parsed: Result<u8, std::num::ParseIntError> = "300".parse();
/// let err = assert_err!(parsed);
/// assert!(err.to_string().contains("too large"));
/// ```
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Err(err) => err,
            Ok(value) => panic!(
                "assertion failed: `{}` returned Ok\n  value: {:?}",
                stringify!($expr),
                value
            ),
        }
    };
}

/// Assert that a string or collection contains the given item.
///
/// # Example
///
/// ```
/// use pyreg_macros::assert_contains;
///
/// assert_contains!("LOAD_CONST 0", "LOAD_CONST");
/// assert_contains!(vec!["a", "b"], &"b");
/// ```
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr $(,)?) => {
        if !$haystack.contains($needle) {
            panic!(
                "assertion failed: `{}` does not contain `{:?}`\n  value: {:?}",
                stringify!($haystack),
                $needle,
                $haystack
            );
        }
    };
}

/// Assert that `$needle` occurs in `$haystack` as a contiguous run.
///
/// # Example
///
/// ```
/// use pyreg_macros::assert_run;
///
/// let ops = ["FUNC_HEADER", "LOAD_CONST", "STORE_NAME", "RETURN_VALUE"];
/// assert_run!(ops, ["LOAD_CONST", "STORE_NAME"]);
/// ```
#[macro_export]
macro_rules! assert_run {
    ($haystack:expr, [$($needle:expr),+ $(,)?]) => {{
        let haystack = &$haystack;
        let haystack = &haystack[..];
        let needle = [$($needle),+];
        if !haystack.windows(needle.len()).any(|w| w == &needle[..]) {
            panic!(
                "assertion failed: {:?} does not occur in `{}`\n  value: {:?}",
                needle,
                stringify!($haystack),
                haystack
            );
        }
    }};
}
