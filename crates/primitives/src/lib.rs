//! Built-in module types and typed protocol clients.

pub mod echo;
pub mod llm;
pub mod models;
pub mod protocols;
pub mod response;
pub mod tools;

use wirecell_runtime::{Module, ModuleTypes};

pub use echo::Echo;
pub use llm::{LlmChat, MockLlm};
pub use models::{
    LlmFunctionCall, LlmMessage, LlmOptions, LlmResponse, LlmRole, LlmUsage, Tool, ToolResult,
};
pub use protocols::{LlmClient, ResponseSink, TextMessageHandler, ToolProvider};
pub use response::ResponseHandler;
pub use tools::{StaticTools, ToolCollector};

/// Add every built-in type to `types`.
pub fn register_builtins(types: &mut ModuleTypes) {
    types.register_fn(response::TYPE_NAME, response::manifest(), |_| {
        Ok(Box::new(ResponseHandler::new()) as Box<dyn Module>)
    });
    types.register_fn(echo::TYPE_NAME, echo::manifest(), |settings| {
        Ok(Box::new(Echo::from_settings(settings)?) as Box<dyn Module>)
    });
    types.register_fn(tools::COLLECTOR_TYPE, tools::collector_manifest(), |_| {
        Ok(Box::new(ToolCollector::new()) as Box<dyn Module>)
    });
    types.register_fn(tools::STATIC_TYPE, tools::static_manifest(), |settings| {
        Ok(Box::new(StaticTools::from_settings(settings)?) as Box<dyn Module>)
    });
    types.register_fn(llm::MOCK_TYPE, llm::mock_manifest(), |settings| {
        Ok(Box::new(MockLlm::from_settings(settings)?) as Box<dyn Module>)
    });
    types.register_fn(llm::CHAT_TYPE, llm::chat_manifest(), |settings| {
        Ok(Box::new(LlmChat::from_settings(settings)?) as Box<dyn Module>)
    });
}

/// A catalog holding only the built-in types.
pub fn builtin_types() -> ModuleTypes {
    let mut types = ModuleTypes::new();
    register_builtins(&mut types);
    types
}
