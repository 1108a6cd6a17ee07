#![doc = include_str!("../README.md")]

pub mod adapter;
pub mod broker;
pub mod ext;
pub mod resource;
pub mod shims;
pub mod types;

pub use adapter::{ExecutionAdapterClient, ExecutionAdapterServer};
pub use broker::{Broker, BrokerConfig, BrokerPeerServer, IdParity, ServiceId};
pub use ext::{BrokerExt, ClientConn, ServiceRegistry};
pub use loopp_tonic_core::{Error, Result, proto};
pub use resource::{Closeable, DepSet, Resource, Resources};
