//! Input parsing and validation for what users type into flows.

pub mod policy;
pub mod vehicle;
