//! Names of the classes of the base runtime module.
//!
//! The engine recognizes these by name: contract-ness, account-ness and the
//! exception hierarchy are all anchored here.

pub const STORAGE: &str = "arca.lang.Storage";
pub const CONTRACT: &str = "arca.lang.Contract";
pub const EXTERNALLY_OWNED_ACCOUNT: &str = "arca.lang.ExternallyOwnedAccount";
pub const GAMETE: &str = "arca.lang.Gamete";
pub const MANIFEST: &str = "arca.lang.Manifest";
pub const EVENT: &str = "arca.lang.Event";
pub const EXCEPTION: &str = "arca.lang.Exception";
pub const RUNTIME_EXCEPTION: &str = "arca.lang.RuntimeException";

/// Name of the constructor pseudo-method inside class definitions.
pub const INIT: &str = "<init>";

/// Names of the methods a transfer request implicitly targets.
pub const RECEIVE: &str = "receive";
pub const RECEIVE_RED: &str = "receiveRed";

/// Exception class names raised by the engine itself.
pub const OUT_OF_GAS_ERROR: &str = "arca.lang.OutOfGasError";
pub const INSUFFICIENT_FUNDS_ERROR: &str = "arca.lang.InsufficientFundsError";
pub const ARITHMETIC_EXCEPTION: &str = "arca.lang.ArithmeticException";
pub const NULL_POINTER_EXCEPTION: &str = "arca.lang.NullPointerException";
pub const SIDE_EFFECTS_IN_VIEW_METHOD: &str = "arca.lang.SideEffectsInViewMethodException";
