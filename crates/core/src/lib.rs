pub mod binding;
pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod message;

pub use binding::{Binding, Bindings, ResolvedBinding};
pub use capability::{Arity, Manifest, Requirement};
pub use config::{
    ExchangeConfig, GraphConfig, ModuleConfig, ModuleSettings, ProviderRef, RuntimeSettings,
    ENTRY_CAPABILITIES, ENTRY_ID, EXTERNAL_CALLER, RESPONSE_HANDLER_TYPE, RESPONSE_ID,
};
pub use error::{BuildReport, ConfigIssue, Error, Result};
pub use event::{Event, EventError, EventType};
pub use message::{FileAttachment, FileType, Response};
