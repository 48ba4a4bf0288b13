//! Domain types: service requests, pricing rules, chemical catalogue and the
//! termite-risk calculator.

pub mod chemicals;
pub mod pricing;
pub mod proposals;
pub mod risk;
