//! svn:// protocol support.

pub mod framing;
pub mod item;
pub mod repository;
pub mod wire;

pub use item::SvnItem;
pub use repository::SvnRepository;
