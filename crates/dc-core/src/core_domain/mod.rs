mod agreement;
mod dialogue;
mod dialogue_merge;
mod error;
mod generator;
mod label_merge;
mod labeling;
mod ports;
mod review;
mod statistics;
mod types;
mod validator;

pub use agreement::*;
pub use dialogue::*;
pub use dialogue_merge::*;
pub use error::*;
pub use generator::*;
pub use label_merge::*;
pub use labeling::*;
pub use ports::*;
pub use review::*;
pub use statistics::*;
pub use types::*;
pub use validator::*;
