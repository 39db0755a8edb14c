mod core_domain;

/// Domain types and pure pipeline stages for dialogue dataset curation.
pub mod core {
    pub use crate::core_domain::*;
}
