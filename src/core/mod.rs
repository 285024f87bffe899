// Domain-layer modules and shared errors/models
pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod merge {
    pub use crate::merge::*;
}

pub mod normalization {
    pub use crate::normalization::*;
}

pub mod derived {
    pub use crate::derived::*;
}

pub mod errors {
    pub use crate::errors::*;
}
