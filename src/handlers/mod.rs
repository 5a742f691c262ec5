//! Built-in pipeline handlers.

mod echo;
pub mod heap_storage;
pub mod source_id;
mod tags;

pub use echo::EchoHandler;
pub use heap_storage::HeapStorage;
pub use source_id::SourceIdHandler;
pub use tags::TagHandler;
