pub mod agent;
pub mod bus;
pub mod graph;
pub mod hub;
pub mod instantiator;
pub mod module;
pub mod proxy;
pub mod registry;
pub mod resolver;

pub use agent::Agent;
pub use bus::{EventBus, EventListener, EventRecorder, ListenerFault, SubscriptionId};
pub use graph::{build_graph, BuildOptions, Overrides};
pub use hub::Hub;
pub use instantiator::{BareModule, Instantiator};
pub use module::{
    arg, opt_arg, Dependencies, FnFactory, Module, ModuleFactory, ModuleTypes, ValueStream,
};
pub use proxy::ModuleProxy;
pub use registry::{CapabilityRegistry, RegisteredModule};
pub use resolver::ExchangeResolver;

pub use tokio_util::sync::CancellationToken;
