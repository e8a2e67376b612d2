pub mod apply;
pub mod conn;
pub mod diff;
pub mod entity;
pub mod host;
pub mod proto;
pub mod snapshot;
pub mod socket;

pub use host::Host;
pub use proto::{EntityTypeId, Sequence, MTU};
pub use socket::{resolve, Socket};
