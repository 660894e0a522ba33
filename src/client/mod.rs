pub mod conn;
pub mod history;
pub mod state;

pub use conn::{ClientHandle, StreamClient};
pub use history::{PriceHistory, PricePoint};
pub use state::ClientState;
