pub mod constants;
pub mod entities;
pub mod error;
pub mod ext;
mod parser;
mod types;
pub mod utils;
mod writer;

pub use parser::parse_bsp;
pub use types::*;

pub use glam::Vec3;
