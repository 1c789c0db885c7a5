pub mod memory;
pub mod session;

pub use memory::InMemoryCmisSession;
pub use session::{ChangeBatch, ChangeEvent, ChangeEventType, CmisSession, RemoteObject};
