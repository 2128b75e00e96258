pub mod clock;
pub mod listener;
pub mod plugin;
pub mod repository;
pub mod transport;

pub use clock::*;
pub use listener::*;
pub use plugin::*;
pub use repository::*;
pub use transport::*;
