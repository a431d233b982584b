//! The supported instruction set.
//!
//! Opcode values are the CIL encodings. Every entry records its operand layout, how it affects
//! control flow and its effect on the evaluation stack. Call-like instructions have a stack
//! effect that depends on the referenced signature and are resolved during verification.

use std::fmt;

use strum::EnumIter;

/// Layout of the operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8bit immediate
    Int8,
    /// Unsigned 8bit immediate (argument and local indices)
    UInt8,
    /// Signed 32bit immediate
    Int32,
    /// Signed 64bit immediate
    Int64,
    /// 32bit floating point immediate
    Float32,
    /// 64bit floating point immediate
    Float64,
    /// Metadata token
    Token,
    /// 8bit signed branch displacement
    ShortTarget,
    /// 32bit signed branch displacement
    Target,
    /// Jump table: u32 count followed by 32bit displacements
    Switch,
}

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Continues with the next instruction
    Sequential,
    /// Calls a method and continues with the next instruction
    Call,
    /// Either jumps or continues
    ConditionalBranch,
    /// Always jumps
    UnconditionalBranch,
    /// Jumps through a table or continues
    Switch,
    /// Leaves the method
    Return,
    /// Raises an exception
    Throw,
}

/// Effect of an instruction on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    /// Pops and pushes a fixed number of values
    Fixed {
        /// Values consumed
        pops: u8,
        /// Values produced
        pushes: u8,
    },
    /// Consumes the arguments of the referenced method and pushes its result, if any
    Call,
    /// Consumes the constructor arguments and pushes the new object
    NewObj,
    /// Consumes the return value, if the method has one
    Return,
}

macro_rules! opcodes {
    ($( $variant:ident => $mnemonic:literal, $prefix:literal, $value:literal, $operand:ident, $flow:ident, $stack:expr; )*) => {
        /// A supported instruction opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
        pub enum Opcode {
            $(
                #[doc = $mnemonic]
                $variant,
            )*
        }

        impl Opcode {
            /// Textual mnemonic, as used by disassemblers.
            #[must_use]
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            /// Prefix byte (`0xFE` for two-byte opcodes, `0` otherwise).
            #[must_use]
            pub fn prefix(self) -> u8 {
                match self {
                    $(Opcode::$variant => $prefix,)*
                }
            }

            /// Opcode byte (the second byte for two-byte opcodes).
            #[must_use]
            pub fn value(self) -> u8 {
                match self {
                    $(Opcode::$variant => $value,)*
                }
            }

            /// Operand layout.
            #[must_use]
            pub fn operand_type(self) -> OperandType {
                match self {
                    $(Opcode::$variant => OperandType::$operand,)*
                }
            }

            /// Control flow behaviour.
            #[must_use]
            pub fn flow(self) -> FlowType {
                match self {
                    $(Opcode::$variant => FlowType::$flow,)*
                }
            }

            /// Evaluation stack behaviour.
            #[must_use]
            pub fn stack_effect(self) -> StackEffect {
                match self {
                    $(Opcode::$variant => $stack,)*
                }
            }

            /// Look up an opcode by its encoding.
            #[must_use]
            pub fn from_encoding(prefix: u8, value: u8) -> Option<Opcode> {
                match (prefix, value) {
                    $(($prefix, $value) => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

const fn fixed(pops: u8, pushes: u8) -> StackEffect {
    StackEffect::Fixed { pops, pushes }
}

opcodes! {
    Nop       => "nop",        0x00, 0x00, None,        Sequential,          fixed(0, 0);
    Ldarg0    => "ldarg.0",    0x00, 0x02, None,        Sequential,          fixed(0, 1);
    Ldarg1    => "ldarg.1",    0x00, 0x03, None,        Sequential,          fixed(0, 1);
    Ldarg2    => "ldarg.2",    0x00, 0x04, None,        Sequential,          fixed(0, 1);
    Ldarg3    => "ldarg.3",    0x00, 0x05, None,        Sequential,          fixed(0, 1);
    Ldloc0    => "ldloc.0",    0x00, 0x06, None,        Sequential,          fixed(0, 1);
    Ldloc1    => "ldloc.1",    0x00, 0x07, None,        Sequential,          fixed(0, 1);
    Ldloc2    => "ldloc.2",    0x00, 0x08, None,        Sequential,          fixed(0, 1);
    Ldloc3    => "ldloc.3",    0x00, 0x09, None,        Sequential,          fixed(0, 1);
    Stloc0    => "stloc.0",    0x00, 0x0A, None,        Sequential,          fixed(1, 0);
    Stloc1    => "stloc.1",    0x00, 0x0B, None,        Sequential,          fixed(1, 0);
    Stloc2    => "stloc.2",    0x00, 0x0C, None,        Sequential,          fixed(1, 0);
    Stloc3    => "stloc.3",    0x00, 0x0D, None,        Sequential,          fixed(1, 0);
    LdargS    => "ldarg.s",    0x00, 0x0E, UInt8,       Sequential,          fixed(0, 1);
    LdlocS    => "ldloc.s",    0x00, 0x11, UInt8,       Sequential,          fixed(0, 1);
    StlocS    => "stloc.s",    0x00, 0x13, UInt8,       Sequential,          fixed(1, 0);
    Ldnull    => "ldnull",     0x00, 0x14, None,        Sequential,          fixed(0, 1);
    LdcI4M1   => "ldc.i4.m1",  0x00, 0x15, None,        Sequential,          fixed(0, 1);
    LdcI40    => "ldc.i4.0",   0x00, 0x16, None,        Sequential,          fixed(0, 1);
    LdcI41    => "ldc.i4.1",   0x00, 0x17, None,        Sequential,          fixed(0, 1);
    LdcI42    => "ldc.i4.2",   0x00, 0x18, None,        Sequential,          fixed(0, 1);
    LdcI43    => "ldc.i4.3",   0x00, 0x19, None,        Sequential,          fixed(0, 1);
    LdcI44    => "ldc.i4.4",   0x00, 0x1A, None,        Sequential,          fixed(0, 1);
    LdcI45    => "ldc.i4.5",   0x00, 0x1B, None,        Sequential,          fixed(0, 1);
    LdcI46    => "ldc.i4.6",   0x00, 0x1C, None,        Sequential,          fixed(0, 1);
    LdcI47    => "ldc.i4.7",   0x00, 0x1D, None,        Sequential,          fixed(0, 1);
    LdcI48    => "ldc.i4.8",   0x00, 0x1E, None,        Sequential,          fixed(0, 1);
    LdcI4S    => "ldc.i4.s",   0x00, 0x1F, Int8,        Sequential,          fixed(0, 1);
    LdcI4     => "ldc.i4",     0x00, 0x20, Int32,       Sequential,          fixed(0, 1);
    LdcI8     => "ldc.i8",     0x00, 0x21, Int64,       Sequential,          fixed(0, 1);
    LdcR4     => "ldc.r4",     0x00, 0x22, Float32,     Sequential,          fixed(0, 1);
    LdcR8     => "ldc.r8",     0x00, 0x23, Float64,     Sequential,          fixed(0, 1);
    Dup       => "dup",        0x00, 0x25, None,        Sequential,          fixed(1, 2);
    Pop       => "pop",        0x00, 0x26, None,        Sequential,          fixed(1, 0);
    Call      => "call",       0x00, 0x28, Token,       Call,                StackEffect::Call;
    Ret       => "ret",        0x00, 0x2A, None,        Return,              StackEffect::Return;
    BrS       => "br.s",       0x00, 0x2B, ShortTarget, UnconditionalBranch, fixed(0, 0);
    BrfalseS  => "brfalse.s",  0x00, 0x2C, ShortTarget, ConditionalBranch,   fixed(1, 0);
    BrtrueS   => "brtrue.s",   0x00, 0x2D, ShortTarget, ConditionalBranch,   fixed(1, 0);
    Br        => "br",         0x00, 0x38, Target,      UnconditionalBranch, fixed(0, 0);
    Brfalse   => "brfalse",    0x00, 0x39, Target,      ConditionalBranch,   fixed(1, 0);
    Brtrue    => "brtrue",     0x00, 0x3A, Target,      ConditionalBranch,   fixed(1, 0);
    Switch    => "switch",     0x00, 0x45, Switch,      Switch,              fixed(1, 0);
    Add       => "add",        0x00, 0x58, None,        Sequential,          fixed(2, 1);
    Sub       => "sub",        0x00, 0x59, None,        Sequential,          fixed(2, 1);
    Mul       => "mul",        0x00, 0x5A, None,        Sequential,          fixed(2, 1);
    Callvirt  => "callvirt",   0x00, 0x6F, Token,       Call,                StackEffect::Call;
    Ldstr     => "ldstr",      0x00, 0x72, Token,       Sequential,          fixed(0, 1);
    Newobj    => "newobj",     0x00, 0x73, Token,       Call,                StackEffect::NewObj;
    Throw     => "throw",      0x00, 0x7A, None,        Throw,               fixed(1, 0);
    Ldfld     => "ldfld",      0x00, 0x7B, Token,       Sequential,          fixed(1, 1);
    Ldflda    => "ldflda",     0x00, 0x7C, Token,       Sequential,          fixed(1, 1);
    Stfld     => "stfld",      0x00, 0x7D, Token,       Sequential,          fixed(2, 0);
    Ldsfld    => "ldsfld",     0x00, 0x7E, Token,       Sequential,          fixed(0, 1);
    Ldsflda   => "ldsflda",    0x00, 0x7F, Token,       Sequential,          fixed(0, 1);
    Stsfld    => "stsfld",     0x00, 0x80, Token,       Sequential,          fixed(1, 0);
    Box       => "box",        0x00, 0x8C, Token,       Sequential,          fixed(1, 1);
    Ldtoken   => "ldtoken",    0x00, 0xD0, Token,       Sequential,          fixed(0, 1);
    Ldftn     => "ldftn",      0xFE, 0x06, Token,       Sequential,          fixed(0, 1);
}

impl Opcode {
    /// Encoded size of the opcode itself (without operand).
    #[must_use]
    pub fn size(self) -> usize {
        if self.prefix() == 0 {
            1
        } else {
            2
        }
    }

    /// Returns `true` for branches and `switch`.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortTarget | OperandType::Target | OperandType::Switch
        )
    }

    /// Returns `true` if execution never falls through to the next instruction.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch | FlowType::Return | FlowType::Throw
        )
    }

    /// The 32bit displacement form of a short branch; other opcodes map to themselves.
    #[must_use]
    pub fn long_form(self) -> Opcode {
        match self {
            Opcode::BrS => Opcode::Br,
            Opcode::BrfalseS => Opcode::Brfalse,
            Opcode::BrtrueS => Opcode::Brtrue,
            other => other,
        }
    }

    /// Returns `true` for opcodes whose token operand names a field.
    #[must_use]
    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            Opcode::Ldfld
                | Opcode::Ldflda
                | Opcode::Stfld
                | Opcode::Ldsfld
                | Opcode::Ldsflda
                | Opcode::Stsfld
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::IntoEnumIterator;

    #[test]
    fn encodings_are_unique_and_resolvable() {
        let mut seen = HashSet::new();
        for opcode in Opcode::iter() {
            assert!(seen.insert((opcode.prefix(), opcode.value())), "{opcode}");
            assert_eq!(
                Opcode::from_encoding(opcode.prefix(), opcode.value()),
                Some(opcode)
            );
        }

        assert_eq!(Opcode::from_encoding(0x00, 0x01), None);
        assert_eq!(Opcode::from_encoding(0xFE, 0x00), None);
    }

    #[test]
    fn branch_forms() {
        assert_eq!(Opcode::BrS.long_form(), Opcode::Br);
        assert_eq!(Opcode::BrtrueS.long_form(), Opcode::Brtrue);
        assert_eq!(Opcode::Br.long_form(), Opcode::Br);
        assert_eq!(Opcode::Call.long_form(), Opcode::Call);

        assert!(Opcode::Switch.is_branch());
        assert!(!Opcode::Call.is_branch());
        assert!(Opcode::Br.is_terminator());
        assert!(!Opcode::Brtrue.is_terminator());
        assert!(Opcode::Throw.is_terminator());
    }

    #[test]
    fn properties() {
        assert_eq!(Opcode::Ldftn.size(), 2);
        assert_eq!(Opcode::Ldftn.to_string(), "ldftn");
        assert_eq!(Opcode::Callvirt.stack_effect(), StackEffect::Call);
        assert_eq!(
            Opcode::Stfld.stack_effect(),
            StackEffect::Fixed { pops: 2, pushes: 0 }
        );
        assert!(Opcode::Ldsflda.is_field_access());
        assert!(!Opcode::Ldtoken.is_field_access());
    }
}
