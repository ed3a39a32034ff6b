//! 提示词

pub mod advanced;
pub mod dynamic;
pub mod encoder;
pub mod weight;

pub use dynamic::{parse_prompt, Wildcards};
pub use encoder::encode_prompt;
pub use weight::{TokenNormalization, WeightInterpretation};
