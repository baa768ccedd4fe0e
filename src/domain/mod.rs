pub mod assets;
pub mod error;
pub mod post;
