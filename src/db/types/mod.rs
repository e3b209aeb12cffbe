mod records;
mod status;

pub use records::*;
pub use status::*;
