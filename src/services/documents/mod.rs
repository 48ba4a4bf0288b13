//! Proposal and contract document generation.

pub mod assembler;
pub mod compositor;
pub mod docx;
pub mod filler;
pub mod packager;

pub use assembler::{DocumentAssembler, DocumentKind, PipelineError, ProposalPackage};
pub use compositor::ScalePolicy;
