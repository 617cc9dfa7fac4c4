pub mod frame;
mod protocol;

pub use frame::{Encoding, MessageType};
pub use protocol::{Request, Response, Status};
