pub mod color;
pub mod discovery;
