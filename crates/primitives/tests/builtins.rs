use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use wirecell_core::{ConfigIssue, Error, GraphConfig, Manifest, Requirement, Result, RESPONSE_ID};
use wirecell_primitives::{builtin_types, LlmClient, LlmMessage, ResponseSink, ToolProvider};
use wirecell_runtime::{
    build_graph, BuildOptions, CancellationToken, Dependencies, EventRecorder, Module, ModuleProxy,
};

const ECHO: &str = r#"
id: echo-agent
modules:
  - module: Echo
    id: echo
    config:
      prefix: "You said: "
"#;

const TOOLS: &str = r#"
id: tool-agent
modules:
  - module: Echo
    id: echo
  - module: ToolCollector
    id: collector
  - module: StaticTools
    id: clock
    config:
      tools:
        - name: now
          description: Current time
          result: "12:00"
  - module: StaticTools
    id: weather
    config:
      tools:
        - name: forecast
          result: sunny
exchange:
  - module: collector
    protocol: ToolProviderProtocol
    provider: [weather, clock]
"#;

const CHAT: &str = r#"
id: chat-agent
modules:
  - module: LlmChat
    id: chat
    config:
      system_prompt: Be brief.
  - module: MockLLM
    id: llm
    config:
      responses: ["Hello there", "Still here"]
      chunk_size: 5
"#;

#[tokio::test]
async fn echo_answers_through_implicit_response_module() {
    let config = GraphConfig::from_yaml(ECHO).unwrap();
    let agent = build_graph(&config, &builtin_types(), &BuildOptions::default()).unwrap();

    assert!(agent.module(RESPONSE_ID).is_some());
    assert_eq!(agent.entry_module_id(), "echo");
    let response = agent.handle_text("hi").await.unwrap();
    assert_eq!(response.text.as_deref(), Some("You said: hi"));

    // Drained after each request.
    let response = agent.handle_text("again").await.unwrap();
    assert_eq!(response.text.as_deref(), Some("You said: again"));
}

#[test]
fn echo_without_response_module_is_unresolved() {
    let config = GraphConfig::from_yaml(ECHO).unwrap();
    let options = BuildOptions::default().without_implicit_response();
    let err = build_graph(&config, &builtin_types(), &options).unwrap_err();
    assert!(matches!(
        err.issues(),
        [ConfigIssue::UnresolvedDependency { capability, .. }] if capability == "ResponseProtocol"
    ));
}

#[tokio::test]
async fn collector_routes_to_owning_provider() {
    let config = GraphConfig::from_yaml(TOOLS).unwrap();
    let agent = build_graph(&config, &builtin_types(), &BuildOptions::default()).unwrap();
    let recorder = EventRecorder::new();
    agent.subscribe("", Arc::new(recorder.clone()));

    let collector = agent.module("collector").unwrap();
    let names: Vec<String> = collector
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["forecast", "now"]);

    let result = collector.execute_tool("now", &json!({})).await.unwrap();
    assert!(result.success);
    assert_eq!(result.result, Some(json!("12:00")));
    let executed_by: Vec<String> = recorder
        .events()
        .into_iter()
        .filter(|e| e.method == "execute_tool" && e.caller_id == "collector")
        .map(|e| e.module_id)
        .collect();
    assert_eq!(executed_by, vec!["clock", "clock"]);

    let missing = collector.execute_tool("teleport", &json!({})).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("Could not find teleport"));
}

#[tokio::test]
async fn chat_keeps_history_and_streams() {
    let config = GraphConfig::from_yaml(CHAT).unwrap();
    let agent = build_graph(&config, &builtin_types(), &BuildOptions::default()).unwrap();
    let recorder = EventRecorder::new();
    agent.subscribe("llm", Arc::new(recorder.clone()));

    assert_eq!(agent.handle_text("hi").await.unwrap().text.as_deref(), Some("Hello there"));
    assert_eq!(agent.handle_text("and?").await.unwrap().text.as_deref(), Some("Still here"));

    let second_call = recorder
        .events()
        .into_iter()
        .filter(|e| e.event_type == wirecell_core::EventType::Call)
        .nth(1)
        .unwrap();
    let messages = second_call.arguments.unwrap()["messages"].clone();
    assert_eq!(messages.as_array().unwrap().len(), 4);
    assert_eq!(messages[0]["role"], "system");

    let llm = agent.module("llm").unwrap();
    let chunks: Vec<String> = llm
        .generate_stream(&[LlmMessage::user("stream")], None)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec!["Hello", " ther", "e"]);
}

#[test]
fn mock_llm_config_is_validated_at_build() {
    let config = GraphConfig::from_yaml(&CHAT.replace("chunk_size: 5", "chunk_size: 0")).unwrap();
    let err = build_graph(&config, &builtin_types(), &BuildOptions::default()).unwrap_err();
    assert!(matches!(
        err.issues(),
        [ConfigIssue::Instantiation { module_id, .. }] if module_id == "llm"
    ));
}

/// Answers "partial" and then never finishes on its first request; answers
/// "full" on every later one.
#[derive(Default)]
struct Stalling {
    stalled: AtomicBool,
    response: Option<ModuleProxy>,
}

#[async_trait]
impl Module for Stalling {
    fn wire(&mut self, deps: &mut Dependencies) -> Result<()> {
        self.response = Some(deps.take("response")?);
        Ok(())
    }

    async fn call(&self, _method: &str, _args: Value) -> Result<Value> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| Error::Other("not wired".to_string()))?;
        if !self.stalled.swap(true, Ordering::SeqCst) {
            response.respond_text("partial").await?;
            std::future::pending::<()>().await;
        }
        response.respond_text("full").await?;
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn cancelled_request_leaves_no_partial_response() {
    let mut types = builtin_types();
    types.register_fn(
        "Stalling",
        Manifest::new()
            .provides("TextMessageHandlerProtocol")
            .requires(Requirement::one("response", "ResponseProtocol")),
        |_| Ok(Box::new(Stalling::default()) as Box<dyn Module>),
    );
    let config = GraphConfig::from_yaml("id: stall\nmodules:\n  - module: Stalling\n    id: stall\n")
        .unwrap();
    let agent = build_graph(&config, &types, &BuildOptions::default()).unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });
    let err = agent.handle_text_cancellable("first", token).await.unwrap_err();
    assert!(err.is_cancelled());

    let response = agent.handle_text("second").await.unwrap();
    assert_eq!(response.text.as_deref(), Some("full"));
}
