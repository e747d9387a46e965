pub mod memory;
pub mod tcp;
pub mod traits;

pub use memory::{Dial, Fault, MemoryConnector, MemoryPeers, MemoryStream};
pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
