//! Error handling foundation for taskgraph.
//!
//! Each crate defines its own domain-specific error enums. Service and
//! infrastructure boundaries wrap them in a rootcause `Report`.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
