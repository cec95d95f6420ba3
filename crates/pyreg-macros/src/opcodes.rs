// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Instruction-set table macros.
//!
//! The opcode and intrinsic tables are shared byte-for-byte with the virtual
//! machine, so they are written once as data and expanded into enums plus
//! lookup functions.

/// Define an opcode enum together with its mnemonic and immediate layout.
///
/// Each entry names the variant, its numeric value, the mnemonic used by the
/// VM tables, and the list of immediate kinds (variants of the given kind
/// type) the instruction carries, in encoding order.
///
/// # Example
///
/// ```
/// use pyreg_macros::opcodes;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Imm { Reg, Lit }
///
/// opcodes! {
///     Opcode: u8 => Imm {
///         Nop = 9, "NOP", [];
///         LoadFast = 50, "LOAD_FAST", [Reg];
///         CompareOp = 36, "COMPARE_OP", [Lit, Reg];
///     }
/// }
///
/// assert_eq!(Opcode::try_from(50u8), Ok(Opcode::LoadFast));
/// assert_eq!(Opcode::CompareOp.mnemonic(), "COMPARE_OP");
/// assert_eq!(Opcode::CompareOp.imms(), &[Imm::Lit, Imm::Reg]);
/// assert_eq!(Opcode::from_mnemonic("NOP"), Some(Opcode::Nop));
/// ```
#[macro_export]
macro_rules! opcodes {
    (
        $(#[$meta:meta])*
        $name:ident : $repr:ty => $imm:ident {
            $($opcode:ident = $value:literal, $mnemonic:literal, [$($kind:ident),*];)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $(
                #[doc = $mnemonic]
                $opcode = $value
            ),+
        }

        impl TryFrom<$repr> for $name {
            type Error = $repr;

            fn try_from(value: $repr) -> Result<Self, $repr> {
                match value {
                    $($value => Ok(Self::$opcode),)+
                    other => Err(other),
                }
            }
        }

        impl $name {
            /// Mnemonic as spelled in the VM dispatch table.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $(Self::$opcode => $mnemonic,)+
                }
            }

            /// Immediate operand kinds, in encoding order.
            pub const fn imms(&self) -> &'static [$imm] {
                match self {
                    $(Self::$opcode => &[$($imm::$kind),*],)+
                }
            }

            /// Looks an opcode up by mnemonic.
            pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
                match mnemonic {
                    $($mnemonic => Some(Self::$opcode),)+
                    _ => None,
                }
            }

            /// Every opcode, in table order.
            pub const fn all() -> &'static [Self] {
                &[$(Self::$opcode),+]
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    };
}

/// Define the table of VM helper functions reachable through the
/// `CALL_INTRINSIC_*` instructions.
///
/// # Example
///
/// ```
/// use pyreg_macros::intrinsics;
///
/// intrinsics! {
///     Intrinsic: u8 {
///         Print = 10, "vm_print", Some(1);
///         BuildString = 6, "vm_build_string", None;
///     }
/// }
///
/// assert_eq!(Intrinsic::Print.name(), "vm_print");
/// assert_eq!(Intrinsic::Print.arity(), Some(1));
/// assert_eq!(Intrinsic::BuildString.arity(), None);
/// assert_eq!(Intrinsic::try_from(6u8), Ok(Intrinsic::BuildString));
/// ```
#[macro_export]
macro_rules! intrinsics {
    (
        $(#[$meta:meta])*
        $name:ident : $repr:ty {
            $($variant:ident = $value:literal, $fname:literal, $arity:expr;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $(
                #[doc = $fname]
                $variant = $value
            ),+
        }

        impl TryFrom<$repr> for $name {
            type Error = $repr;

            fn try_from(value: $repr) -> Result<Self, $repr> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl $name {
            /// Name of the C helper the VM binds to this id.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $fname,)+
                }
            }

            /// Fixed argument count, or `None` for variadic helpers.
            pub const fn arity(&self) -> Option<u8> {
                match self {
                    $(Self::$variant => $arity,)+
                }
            }

            /// Every intrinsic, in table order.
            pub const fn all() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }
    };
}
