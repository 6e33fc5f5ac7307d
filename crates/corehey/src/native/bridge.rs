//! Typed calls into the native core.
//!
//! Strings returned by the native side are owned by it. The bridge copies the
//! bytes into a Rust `String` and then hands the pointer back through
//! `FreeCString`, exactly once per non-null result. A null result decodes to
//! an empty string.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use super::descriptor::{
    self, NativeFunctionDescriptor, ParamKind, ADD, FIBONACCI, FREE_C_STRING, GET_QUICK_REPLIES,
    GET_TYPIFICATION, IS_PRIME, MULTIPLY,
};
use super::symbols::{Availability, BoundFunction, SymbolTable};
use crate::error::{CoreHeyError, Result};

/// An argument passed across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeArg<'a> {
    Text(&'a str),
    Int(i32),
}

/// A value returned across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeValue {
    Text(String),
    Int(i32),
}

/// A loaded native core with its bound symbol table.
pub struct NativeBridge {
    symbols: SymbolTable,
    origin: PathBuf,
    // Kept alive so bound fn pointers stay valid; never unloaded.
    _library: Option<Library>,
}

impl std::fmt::Debug for NativeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBridge")
            .field("origin", &self.origin)
            .field("capabilities", &self.symbols.capabilities())
            .finish_non_exhaustive()
    }
}

impl NativeBridge {
    /// Open a shared library and bind the descriptor table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::LibraryNotFound`] if `path` does not exist,
    /// [`CoreHeyError::LibraryLoadFailed`] if the OS loader rejects it, and
    /// [`CoreHeyError::MissingRequiredSymbol`] if a mandatory export is absent.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CoreHeyError::LibraryNotFound {
                probed: vec![path.to_path_buf()],
            });
        }

        // SAFETY: loading runs the library's initialisers. The artifact is the
        // native core shipped alongside this crate.
        let library =
            unsafe { Library::new(path) }.map_err(|e| CoreHeyError::LibraryLoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let symbols = SymbolTable::bind_library(&library, path)?;
        info!(path = %path.display(), "Loaded native library");

        Ok(Self {
            symbols,
            origin: path.to_path_buf(),
            _library: Some(library),
        })
    }

    /// Wrap an in-memory symbol table, e.g. a test double.
    #[must_use]
    pub fn from_symbols(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            origin: PathBuf::from("<in-memory>"),
            _library: None,
        }
    }

    /// Where the bound symbols came from.
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    #[must_use]
    pub fn is_available(&self, descriptor: &NativeFunctionDescriptor) -> bool {
        self.symbols.availability(descriptor.symbol) == Availability::Bound
    }

    /// Call a descriptor with dynamically typed arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::FunctionNotAvailable`] for unbound optional
    /// symbols, [`CoreHeyError::InvalidArgument`] when `args` do not match
    /// the descriptor or a string contains an interior NUL, and
    /// [`CoreHeyError::NativeCallFailed`] when the result cannot be decoded.
    pub fn call(
        &self,
        descriptor: &NativeFunctionDescriptor,
        args: &[NativeArg<'_>],
    ) -> Result<NativeValue> {
        if descriptor::descriptor(descriptor.symbol) != Some(descriptor) {
            return Err(CoreHeyError::InvalidArgument(format!(
                "{} does not match the exported signature",
                descriptor.symbol
            )));
        }
        let function = self.bound(descriptor)?;
        check_arity(descriptor, args)?;

        match function {
            BoundFunction::Text(function) => {
                let encoded = args
                    .iter()
                    .enumerate()
                    .map(|(index, arg)| match arg {
                        NativeArg::Text(value) => encode(descriptor, index, value),
                        NativeArg::Int(_) => Err(kind_mismatch(descriptor, index)),
                    })
                    .collect::<Result<Vec<CString>>>()?;

                let [first, second, third] = encoded.as_slice() else {
                    return Err(CoreHeyError::InvalidArgument(format!(
                        "{} expects 3 argument(s), got {}",
                        descriptor.symbol,
                        encoded.len()
                    )));
                };

                // SAFETY: three valid NUL-terminated buffers that outlive the call.
                let raw = unsafe { function(first.as_ptr(), second.as_ptr(), third.as_ptr()) };
                self.take_owned_string(descriptor, raw).map(NativeValue::Text)
            }
            BoundFunction::BinaryInt(function) => {
                let (a, b) = (int_arg(descriptor, args, 0)?, int_arg(descriptor, args, 1)?);
                // SAFETY: plain integer arguments, no ownership transfer.
                Ok(NativeValue::Int(unsafe { function(a, b) }))
            }
            BoundFunction::UnaryInt(function) => {
                let n = int_arg(descriptor, args, 0)?;
                // SAFETY: plain integer argument, no ownership transfer.
                Ok(NativeValue::Int(unsafe { function(n) }))
            }
            BoundFunction::Release(_) => Err(CoreHeyError::InvalidArgument(format!(
                "{} is invoked by the bridge and cannot be called directly",
                descriptor.symbol
            ))),
        }
    }

    /// `GetQuickReplies(token, org, group)`
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::call`].
    pub fn get_quick_replies(&self, token: &str, org: &str, group: &str) -> Result<String> {
        self.call_text(&GET_QUICK_REPLIES, token, org, group)
    }

    /// `GetTypification(token, org, group)`
    ///
    /// # Errors
    ///
    /// See [`NativeBridge::call`].
    pub fn get_typification(&self, token: &str, org: &str, group: &str) -> Result<String> {
        self.call_text(&GET_TYPIFICATION, token, org, group)
    }

    /// # Errors
    ///
    /// [`CoreHeyError::FunctionNotAvailable`] if `Add` is not exported.
    pub fn add(&self, a: i32, b: i32) -> Result<i32> {
        self.call_int(&ADD, &[NativeArg::Int(a), NativeArg::Int(b)])
    }

    /// # Errors
    ///
    /// [`CoreHeyError::FunctionNotAvailable`] if `Multiply` is not exported.
    pub fn multiply(&self, a: i32, b: i32) -> Result<i32> {
        self.call_int(&MULTIPLY, &[NativeArg::Int(a), NativeArg::Int(b)])
    }

    /// Raw `Fibonacci(n)`; input validation is the caller's concern.
    ///
    /// # Errors
    ///
    /// [`CoreHeyError::FunctionNotAvailable`] if `Fibonacci` is not exported.
    pub fn fibonacci(&self, n: i32) -> Result<i32> {
        self.call_int(&FIBONACCI, &[NativeArg::Int(n)])
    }

    /// Raw `IsPrime(n)`, non-zero meaning prime.
    ///
    /// # Errors
    ///
    /// [`CoreHeyError::FunctionNotAvailable`] if `IsPrime` is not exported.
    pub fn is_prime(&self, n: i32) -> Result<bool> {
        self.call_int(&IS_PRIME, &[NativeArg::Int(n)]).map(|v| v != 0)
    }

    fn call_text(
        &self,
        descriptor: &NativeFunctionDescriptor,
        token: &str,
        org: &str,
        group: &str,
    ) -> Result<String> {
        let args = [NativeArg::Text(token), NativeArg::Text(org), NativeArg::Text(group)];
        match self.call(descriptor, &args)? {
            NativeValue::Text(value) => Ok(value),
            other => Err(unexpected_value(descriptor, &other)),
        }
    }

    fn call_int(
        &self,
        descriptor: &NativeFunctionDescriptor,
        args: &[NativeArg<'_>],
    ) -> Result<i32> {
        match self.call(descriptor, args)? {
            NativeValue::Int(value) => Ok(value),
            other => Err(unexpected_value(descriptor, &other)),
        }
    }

    fn bound(&self, descriptor: &NativeFunctionDescriptor) -> Result<BoundFunction> {
        self.symbols
            .get(descriptor.symbol)
            .ok_or(CoreHeyError::FunctionNotAvailable {
                symbol: descriptor.symbol,
            })
    }

    /// Copy a native-owned string and release it.
    fn take_owned_string(
        &self,
        descriptor: &NativeFunctionDescriptor,
        raw: *mut c_char,
    ) -> Result<String> {
        if raw.is_null() {
            debug!(symbol = descriptor.symbol, "Native call returned null");
            return Ok(String::new());
        }

        // SAFETY: non-null pointer to a NUL-terminated buffer allocated by the
        // native side, still valid until FreeCString is called below.
        let bytes = unsafe { CStr::from_ptr(raw) }.to_bytes().to_vec();
        self.release(raw)?;

        String::from_utf8(bytes).map_err(|e| CoreHeyError::NativeCallFailed {
            symbol: descriptor.symbol,
            reason: format!("result is not valid UTF-8: {e}"),
        })
    }

    fn release(&self, raw: *mut c_char) -> Result<()> {
        match self.bound(&FREE_C_STRING)? {
            BoundFunction::Release(free) => {
                // SAFETY: `raw` came from the native side and is released once.
                unsafe { free(raw) };
                Ok(())
            }
            _ => Err(CoreHeyError::NativeCallFailed {
                symbol: FREE_C_STRING.symbol,
                reason: "bound with an unexpected signature".to_string(),
            }),
        }
    }
}

fn check_arity(descriptor: &NativeFunctionDescriptor, args: &[NativeArg<'_>]) -> Result<()> {
    if args.len() == descriptor.params.len() {
        return Ok(());
    }
    Err(CoreHeyError::InvalidArgument(format!(
        "{} expects {} argument(s), got {}",
        descriptor.symbol,
        descriptor.params.len(),
        args.len()
    )))
}

fn encode(descriptor: &NativeFunctionDescriptor, index: usize, value: &str) -> Result<CString> {
    CString::new(value).map_err(|e| {
        CoreHeyError::InvalidArgument(format!(
            "argument {index} of {} contains a NUL byte at position {}",
            descriptor.symbol,
            e.nul_position()
        ))
    })
}

fn int_arg(
    descriptor: &NativeFunctionDescriptor,
    args: &[NativeArg<'_>],
    index: usize,
) -> Result<c_int> {
    let expects_int = descriptor.params.get(index) == Some(&ParamKind::Int32);
    match args.get(index) {
        Some(NativeArg::Int(value)) if expects_int => Ok(*value),
        _ => Err(kind_mismatch(descriptor, index)),
    }
}

fn kind_mismatch(descriptor: &NativeFunctionDescriptor, index: usize) -> CoreHeyError {
    let expected = descriptor
        .params
        .get(index)
        .map_or_else(|| "nothing".to_string(), |kind| format!("{kind:?}"));
    CoreHeyError::InvalidArgument(format!(
        "argument {index} of {} must be {expected}",
        descriptor.symbol
    ))
}

fn unexpected_value(descriptor: &NativeFunctionDescriptor, value: &NativeValue) -> CoreHeyError {
    CoreHeyError::NativeCallFailed {
        symbol: descriptor.symbol,
        reason: format!("unexpected return value {value:?}"),
    }
}
