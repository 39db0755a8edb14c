pub mod documents;
pub mod export;
pub mod files;
pub mod store;

pub use documents::*;
pub use export::*;
pub use files::*;
pub use store::*;
