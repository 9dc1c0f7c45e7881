//! All-details report: a machine-first, digest-addressed artifact plus an
//! independent verifier ("doctor").
//!
//! The report carries input digests, the computed core result, per-node
//! witnesses, and honest caps/omissions accounting. The doctor re-checks a
//! report against the inputs it was derived from without trusting any of
//! the report's own claims.

pub mod all_details;
pub mod builders;
pub mod contract;
pub mod doctor;
pub mod witness;
