pub mod handler;
pub mod protocol;
pub mod router;
pub mod session;

pub use handler::{StreamContext, StreamHandler};
pub use protocol::{ClientCommand, ServerEvent, SubscriptionAction};
pub use router::BroadcastRouter;
pub use session::{Session, SessionHandle, SessionRegistry, SessionState};
