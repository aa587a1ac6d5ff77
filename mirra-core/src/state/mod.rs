pub mod session;
mod status;

pub use session::SessionPhase;
pub use status::SessionStatus;
