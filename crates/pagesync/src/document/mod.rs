pub mod operation;
pub mod page;
pub mod registry;
pub mod session;

pub use operation::{Action, Attributes, ClientId, Operation};
pub use page::Page;
pub use registry::DocumentRegistry;
pub use session::{Applied, DocumentSession};
