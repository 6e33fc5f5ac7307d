//! Bound function pointers and the capability registry built at load time.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::os::raw::{c_char, c_int};
use std::path::Path;

use libloading::Library;
use tracing::debug;

use super::descriptor::{NativeFunctionDescriptor, Signature, DESCRIPTORS};
use crate::error::{CoreHeyError, Result};

/// `char* GetQuickReplies(const char* token, const char* org, const char* group)`
pub type TextFn =
    unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *mut c_char;

/// `void FreeCString(char* ptr)`
pub type ReleaseFn = unsafe extern "C" fn(*mut c_char);

/// `int Add(int a, int b)`
pub type BinaryIntFn = unsafe extern "C" fn(c_int, c_int) -> c_int;

/// `int Fibonacci(int n)`
pub type UnaryIntFn = unsafe extern "C" fn(c_int) -> c_int;

/// A function pointer bound to one descriptor.
#[derive(Clone, Copy)]
pub enum BoundFunction {
    Text(TextFn),
    Release(ReleaseFn),
    BinaryInt(BinaryIntFn),
    UnaryInt(UnaryIntFn),
}

impl BoundFunction {
    #[must_use]
    pub const fn signature(&self) -> Signature {
        match self {
            Self::Text(_) => Signature::Text3,
            Self::Release(_) => Signature::Release,
            Self::BinaryInt(_) => Signature::BinaryInt,
            Self::UnaryInt(_) => Signature::UnaryInt,
        }
    }
}

impl fmt::Debug for BoundFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundFunction({:?})", self.signature())
    }
}

/// Whether a descriptor was bound when the library was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Bound,
    Absent,
}

/// Symbol name to bound-or-absent mapping, one entry per descriptor.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: BTreeMap<&'static str, Option<BoundFunction>>,
}

impl SymbolTable {
    /// Start an in-memory table, used to substitute the native core.
    #[must_use]
    pub fn builder() -> SymbolTableBuilder {
        SymbolTableBuilder::default()
    }

    /// Bind every descriptor through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::MissingRequiredSymbol`] if a mandatory
    /// descriptor cannot be bound.
    pub fn bind_with<F>(origin: &Path, mut lookup: F) -> Result<Self>
    where
        F: FnMut(&NativeFunctionDescriptor) -> Option<BoundFunction>,
    {
        let mut entries = BTreeMap::new();

        for descriptor in DESCRIPTORS {
            let bound = lookup(descriptor)
                .filter(|function| Some(function.signature()) == descriptor.signature());

            match (&bound, descriptor.required) {
                (None, true) => {
                    return Err(CoreHeyError::MissingRequiredSymbol {
                        symbol: descriptor.symbol,
                        path: origin.to_path_buf(),
                    });
                }
                (None, false) => {
                    debug!(symbol = descriptor.symbol, "Optional symbol not exported");
                }
                (Some(_), _) => {
                    debug!(symbol = descriptor.symbol, "Bound symbol");
                }
            }

            entries.insert(descriptor.symbol, bound);
        }

        Ok(Self { entries })
    }

    /// Bind every descriptor from a loaded shared library.
    ///
    /// # Errors
    ///
    /// See [`SymbolTable::bind_with`].
    pub fn bind_library(library: &Library, origin: &Path) -> Result<Self> {
        Self::bind_with(origin, |descriptor| lookup_symbol(library, descriptor))
    }

    #[must_use]
    pub fn availability(&self, symbol: &str) -> Availability {
        match self.entries.get(symbol) {
            Some(Some(_)) => Availability::Bound,
            _ => Availability::Absent,
        }
    }

    /// Snapshot of every descriptor's availability, ordered by symbol name.
    #[must_use]
    pub fn capabilities(&self) -> Vec<(&'static str, Availability)> {
        self.entries
            .iter()
            .map(|(symbol, bound)| {
                let availability = if bound.is_some() {
                    Availability::Bound
                } else {
                    Availability::Absent
                };
                (*symbol, availability)
            })
            .collect()
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<BoundFunction> {
        self.entries.get(symbol).copied().flatten()
    }
}

fn lookup_symbol(
    library: &Library,
    descriptor: &NativeFunctionDescriptor,
) -> Option<BoundFunction> {
    let name = descriptor.c_symbol();

    // SAFETY: the pointer types below match the C declarations exported by
    // the native core for each signature. The copied fn pointers stay valid
    // because the `Library` is kept alive for the lifetime of the bridge.
    unsafe {
        match descriptor.signature()? {
            Signature::Text3 => library
                .get::<TextFn>(&name)
                .ok()
                .map(|symbol| BoundFunction::Text(*symbol)),
            Signature::Release => library
                .get::<ReleaseFn>(&name)
                .ok()
                .map(|symbol| BoundFunction::Release(*symbol)),
            Signature::BinaryInt => library
                .get::<BinaryIntFn>(&name)
                .ok()
                .map(|symbol| BoundFunction::BinaryInt(*symbol)),
            Signature::UnaryInt => library
                .get::<UnaryIntFn>(&name)
                .ok()
                .map(|symbol| BoundFunction::UnaryInt(*symbol)),
        }
    }
}

/// Builds a [`SymbolTable`] from function pointers supplied by the caller.
#[derive(Default)]
pub struct SymbolTableBuilder {
    functions: HashMap<&'static str, BoundFunction>,
}

impl SymbolTableBuilder {
    #[must_use]
    pub fn quick_replies(self, function: TextFn) -> Self {
        self.with("GetQuickReplies", BoundFunction::Text(function))
    }

    #[must_use]
    pub fn typification(self, function: TextFn) -> Self {
        self.with("GetTypification", BoundFunction::Text(function))
    }

    #[must_use]
    pub fn free_c_string(self, function: ReleaseFn) -> Self {
        self.with("FreeCString", BoundFunction::Release(function))
    }

    #[must_use]
    pub fn add(self, function: BinaryIntFn) -> Self {
        self.with("Add", BoundFunction::BinaryInt(function))
    }

    #[must_use]
    pub fn multiply(self, function: BinaryIntFn) -> Self {
        self.with("Multiply", BoundFunction::BinaryInt(function))
    }

    #[must_use]
    pub fn fibonacci(self, function: UnaryIntFn) -> Self {
        self.with("Fibonacci", BoundFunction::UnaryInt(function))
    }

    #[must_use]
    pub fn is_prime(self, function: UnaryIntFn) -> Self {
        self.with("IsPrime", BoundFunction::UnaryInt(function))
    }

    fn with(mut self, symbol: &'static str, function: BoundFunction) -> Self {
        self.functions.insert(symbol, function);
        self
    }

    /// Validate against the descriptor table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreHeyError::MissingRequiredSymbol`] when a mandatory
    /// function was not supplied.
    pub fn build(self) -> Result<SymbolTable> {
        SymbolTable::bind_with(Path::new("<in-memory>"), |descriptor| {
            self.functions.get(descriptor.symbol).copied()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe extern "C" fn null_text(
        _: *const c_char,
        _: *const c_char,
        _: *const c_char,
    ) -> *mut c_char {
        ptr::null_mut()
    }

    unsafe extern "C" fn noop_release(_: *mut c_char) {}

    extern "C" fn double(n: c_int) -> c_int {
        n * 2
    }

    fn required_only() -> SymbolTableBuilder {
        SymbolTable::builder()
            .quick_replies(null_text)
            .typification(null_text)
            .free_c_string(noop_release)
    }

    #[test]
    fn test_missing_required_symbol_aborts_binding() {
        let err = SymbolTable::builder()
            .quick_replies(null_text)
            .free_c_string(noop_release)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            CoreHeyError::MissingRequiredSymbol { symbol: "GetTypification", .. }
        ));
    }

    #[test]
    fn test_missing_optional_symbols_are_recorded_absent() {
        let table = required_only().fibonacci(double).build().unwrap();

        assert_eq!(table.availability("GetQuickReplies"), Availability::Bound);
        assert_eq!(table.availability("Fibonacci"), Availability::Bound);
        assert_eq!(table.availability("Add"), Availability::Absent);
        assert_eq!(table.availability("IsPrime"), Availability::Absent);
        assert_eq!(table.capabilities().len(), DESCRIPTORS.len());
    }

    #[test]
    fn test_signature_mismatch_is_treated_as_absent() {
        // A unary function registered under a binary descriptor is not bound.
        let table = SymbolTable::bind_with(Path::new("<test>"), |descriptor| {
            match descriptor.symbol {
                "GetQuickReplies" | "GetTypification" => Some(BoundFunction::Text(null_text)),
                "FreeCString" => Some(BoundFunction::Release(noop_release)),
                "Add" => Some(BoundFunction::UnaryInt(double)),
                _ => None,
            }
        })
        .unwrap();

        assert_eq!(table.availability("Add"), Availability::Absent);
        assert!(table.get("Add").is_none());
    }
}
