//! Bridge to the precompiled native core.
//!
//! - [`descriptor`] - the static table of exported functions
//! - [`symbols`] - bound function pointers and the capability registry
//! - [`bridge`] - typed calls and ownership of returned strings
//! - [`loader`] - initialise-once loading of the artifact

pub mod bridge;
pub mod descriptor;
pub mod loader;
pub mod symbols;

pub use bridge::{NativeArg, NativeBridge, NativeValue};
pub use descriptor::{NativeFunctionDescriptor, ParamKind, ReturnKind, Signature, DESCRIPTORS};
pub use loader::{LibraryLoader, ENV_LIBRARY_DIR};
pub use symbols::{
    Availability, BinaryIntFn, BoundFunction, ReleaseFn, SymbolTable, SymbolTableBuilder, TextFn,
    UnaryIntFn,
};
