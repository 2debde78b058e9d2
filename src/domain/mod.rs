pub mod errors;
pub mod presence;
