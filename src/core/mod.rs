/*!
 * Core Module
 * Fundamental types, error taxonomy, and tunable limits
 */

pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use types::*;
