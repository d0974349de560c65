pub mod email;
pub mod filename;
