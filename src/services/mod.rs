//! Service layer: pricing, document generation and upload storage.

pub mod documents;
pub mod pricing;
pub mod uploads;

#[cfg(test)]
pub mod fixtures;

pub use documents::DocumentAssembler;
pub use uploads::UploadStore;
