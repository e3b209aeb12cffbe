pub mod policies;
pub mod vehicles;
