//! Spreadsheet-driven pricing.

pub mod engine;
pub mod formula;
pub mod layout;
pub mod workbook;

pub use engine::{PricingEngine, PricingError};
pub use layout::CalculationInput;
