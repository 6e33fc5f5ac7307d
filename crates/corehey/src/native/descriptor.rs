//! Static table of the functions exported by the native core.

use std::fmt;

/// Kind of a single native parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Null-terminated UTF-8 string, borrowed for the duration of the call.
    Utf8,
    /// Signed 32-bit integer passed by value.
    Int32,
    /// A buffer previously returned by the native side.
    OwnedBuffer,
}

/// Kind of a native return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// UTF-8 string owned by the native side, released through `FreeCString`.
    OwnedUtf8,
    /// Signed 32-bit integer.
    Int32,
    /// No return value.
    None,
}

/// The fixed C signatures the bridge knows how to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// `char* f(const char*, const char*, const char*)`
    Text3,
    /// `void f(char*)`
    Release,
    /// `int f(int, int)`
    BinaryInt,
    /// `int f(int)`
    UnaryInt,
}

/// Description of one exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFunctionDescriptor {
    pub symbol: &'static str,
    pub params: &'static [ParamKind],
    pub returns: ReturnKind,
    /// Missing required symbols abort the load; optional ones are recorded as absent.
    pub required: bool,
}

impl NativeFunctionDescriptor {
    /// The C signature implied by the parameter and return kinds.
    #[must_use]
    pub fn signature(&self) -> Option<Signature> {
        use ParamKind::{Int32, OwnedBuffer, Utf8};

        match (self.params, self.returns) {
            ([Utf8, Utf8, Utf8], ReturnKind::OwnedUtf8) => Some(Signature::Text3),
            ([OwnedBuffer], ReturnKind::None) => Some(Signature::Release),
            ([Int32, Int32], ReturnKind::Int32) => Some(Signature::BinaryInt),
            ([Int32], ReturnKind::Int32) => Some(Signature::UnaryInt),
            _ => None,
        }
    }

    /// Symbol name as a null-terminated byte string for the dynamic loader.
    #[must_use]
    pub fn c_symbol(&self) -> Vec<u8> {
        let mut name = Vec::with_capacity(self.symbol.len() + 1);
        name.extend_from_slice(self.symbol.as_bytes());
        name.push(0);
        name
    }
}

impl fmt::Display for NativeFunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol)
    }
}

const TEXT3: &[ParamKind] = &[ParamKind::Utf8, ParamKind::Utf8, ParamKind::Utf8];
const INT2: &[ParamKind] = &[ParamKind::Int32, ParamKind::Int32];
const INT1: &[ParamKind] = &[ParamKind::Int32];

pub const GET_QUICK_REPLIES: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "GetQuickReplies",
    params: TEXT3,
    returns: ReturnKind::OwnedUtf8,
    required: true,
};

pub const GET_TYPIFICATION: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "GetTypification",
    params: TEXT3,
    returns: ReturnKind::OwnedUtf8,
    required: true,
};

pub const FREE_C_STRING: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "FreeCString",
    params: &[ParamKind::OwnedBuffer],
    returns: ReturnKind::None,
    required: true,
};

pub const ADD: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "Add",
    params: INT2,
    returns: ReturnKind::Int32,
    required: false,
};

pub const MULTIPLY: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "Multiply",
    params: INT2,
    returns: ReturnKind::Int32,
    required: false,
};

pub const FIBONACCI: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "Fibonacci",
    params: INT1,
    returns: ReturnKind::Int32,
    required: false,
};

pub const IS_PRIME: NativeFunctionDescriptor = NativeFunctionDescriptor {
    symbol: "IsPrime",
    params: INT1,
    returns: ReturnKind::Int32,
    required: false,
};

/// Every symbol bound at load time.
pub const DESCRIPTORS: &[NativeFunctionDescriptor] = &[
    GET_QUICK_REPLIES,
    GET_TYPIFICATION,
    FREE_C_STRING,
    ADD,
    MULTIPLY,
    FIBONACCI,
    IS_PRIME,
];

/// Look up a descriptor by symbol name.
#[must_use]
pub fn descriptor(symbol: &str) -> Option<&'static NativeFunctionDescriptor> {
    DESCRIPTORS.iter().find(|d| d.symbol == symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_descriptor_has_a_bindable_signature() {
        for d in DESCRIPTORS {
            assert!(d.signature().is_some(), "{d} has no signature");
        }
    }

    #[test]
    fn test_api_functions_are_mandatory_and_math_optional() {
        for symbol in ["GetQuickReplies", "GetTypification", "FreeCString"] {
            assert!(descriptor(symbol).unwrap().required);
        }
        for symbol in ["Add", "Multiply", "Fibonacci", "IsPrime"] {
            assert!(!descriptor(symbol).unwrap().required);
        }
        assert!(descriptor("Subtract").is_none());
    }

    #[test]
    fn test_c_symbol_is_nul_terminated() {
        assert_eq!(FREE_C_STRING.c_symbol(), b"FreeCString\0".to_vec());
    }
}
