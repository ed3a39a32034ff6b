pub mod directory;
pub mod image;
