// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type definition macros.

/// Assert at compile time.
///
/// # Example
///
/// ```
/// use pyreg_macros::const_assert;
///
/// const FRAME_EXTRA: usize = 4;
/// const_assert!(FRAME_EXTRA >= 2, "frames need a link and a callee slot");
/// ```
#[macro_export]
macro_rules! const_assert {
    ($cond:expr) => {
        const _: () = assert!($cond);
    };
    ($cond:expr, $msg:literal) => {
        const _: () = assert!($cond, $msg);
    };
}

/// Define a transparent bitset over an integer type.
///
/// Besides the usual set operations, the generated type can list the names of
/// the flags it contains, which keeps disassembly and debug output readable.
///
/// # Example
///
/// ```
/// use pyreg_macros::bitflags;
///
/// bitflags! {
///     CodeFlags: u32 {
///         OPTIMIZED = 0x01,
///         NEWLOCALS = 0x02,
///         GENERATOR = 0x20,
///     }
/// }
///
/// let flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
/// assert!(flags.contains(CodeFlags::NEWLOCALS));
/// assert!(!flags.contains(CodeFlags::GENERATOR));
/// assert_eq!(flags.bits(), 0x03);
/// assert_eq!(flags.names(), vec!["OPTIMIZED", "NEWLOCALS"]);
/// ```
#[macro_export]
macro_rules! bitflags {
    (
        $(#[$meta:meta])*
        $name:ident : $repr:ty {
            $($flag:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($repr);

        #[allow(missing_docs)]
        impl $name {
            $(pub const $flag: Self = Self($value);)+

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> $repr {
                self.0
            }

            pub const fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.0 |= other.0;
                } else {
                    self.0 &= !other.0;
                }
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub fn names(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if $value != 0 && self.contains(Self::$flag) {
                        names.push(stringify!($flag));
                    }
                )+
                names
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }
    };
}
