pub mod collection;
pub mod pagination;
pub mod protocol;
pub mod request;
pub mod session;
pub mod signals;
pub mod store;
pub mod viewport;

pub use collection::*;
pub use pagination::*;
pub use protocol::*;
pub use request::*;
pub use session::*;
pub use signals::*;
pub use store::*;
pub use viewport::*;
