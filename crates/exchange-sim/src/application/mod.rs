pub mod factory;
pub mod paper;

pub use factory::PaperClientFactory;
pub use paper::{PaperConfig, PaperExchange};
