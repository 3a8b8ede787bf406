//! # Plugbus
//!
//! A local message bus for plugin processes, coordinated by a hub process.
//!
//! ## Architecture
//!
//! Every process runs one `Node`: a listening socket on loopback, a persisted
//! peer directory, a dispatcher of typed listeners, and a send pipeline that
//! activates dormant peers and retries. On top of that sit the correlator
//! (send and wait for the matching reply), the hub's registration and menu
//! services, and a generic RPC template for synchronous remote interfaces.
//!
//! Messages travel one per connection, encoded with `plugpack`.

pub mod config;
pub mod correlator;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod message;
pub mod node;
pub mod pipeline;
pub mod rpc;
pub mod transport;


pub use config::Settings;
pub use correlator::Correlator;
pub use correlator::Outbound;
pub use directory::Directory;
pub use directory::DirectoryStore;
pub use directory::EphemeralStore;
pub use directory::FileStore;
pub use directory::MenuItem;
pub use directory::PeerDirectory;
pub use directory::PeerInfo;
pub use dispatch::Dispatcher;
pub use dispatch::MessageListener;
pub use error::BusError;
pub use error::Result;
pub use hub::HubClient;
pub use hub::HubService;
pub use message::Band;
pub use message::Message;
pub use message::MessageType;
pub use message::StructuredUrl;
pub use node::Node;
pub use node::NodeBuilder;
pub use node::NodeRef;
pub use pipeline::ActivationError;
pub use pipeline::ActivationMode;
pub use pipeline::Activator;
pub use pipeline::NoopActivator;
pub use rpc::CommandTable;
pub use rpc::RemoteFault;
pub use rpc::RpcCall;
pub use rpc::RpcClient;
pub use rpc::RpcError;
pub use rpc::RpcServer;
pub use rpc::RpcTypes;
pub use transport::Connector;
pub use transport::ServeLimits;
pub use transport::TcpConnector;
pub use transport::TransportError;
