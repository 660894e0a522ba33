pub mod generator;
pub mod price;
pub mod symbol;

pub use generator::PriceGenerator;
pub use price::{PriceTable, PriceTick};
pub use symbol::Symbol;
