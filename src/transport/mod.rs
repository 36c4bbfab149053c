pub mod bt_discovery;
pub mod radio;
pub mod rfcomm;
pub mod tcp;
pub mod traits;

pub use bt_discovery::{BtDiscovery, BtDiscoveryConfig};
pub use radio::{BluerRadio, RadioControl, SimulatedRadio};
pub use rfcomm::RfcommTransport;
pub use tcp::TcpTransport;
pub use traits::{Transport, TransportListener, TransportStream};
