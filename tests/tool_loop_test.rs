//! Tool execution pass: chunk ordering, cost accumulation, and the handling
//! of unknown tool names.

use async_trait::async_trait;
use prism::normalize::PendingCall;
use prism::providers::run_pending_calls;
use prism::tools::{CallResponse, Tool, ToolContext, ToolRegistry};
use prism::types::{
    AssistantProfile, Chunk, CostLedger, CreditCount, LibraryItem, PrismError, Result,
};
use std::sync::Arc;
use tokio::sync::mpsc;

struct EchoTool {
    cost: f64,
    item: bool,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes its arguments back."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn call(&self, _ctx: &ToolContext<'_>, args: &serde_json::Value) -> Result<CallResponse> {
        let text = args
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| PrismError::Domain("echo requires text".into()))?;
        Ok(CallResponse {
            content: text.to_string(),
            cost: CreditCount::new(self.cost),
            item: self.item.then(|| LibraryItem::image("https://img.example/1.png")),
        })
    }
}

fn pending(name: &str, args: serde_json::Value) -> PendingCall {
    PendingCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}

#[tokio::test]
async fn call_chunk_precedes_item_chunk_and_cost_accrues() {
    let registry = ToolRegistry::new().register(Arc::new(EchoTool {
        cost: 3.5,
        item: true,
    }));
    let profile = AssistantProfile::default();
    let ctx = ToolContext {
        profile: &profile,
        files: &[],
    };
    let (tx, mut rx) = mpsc::channel(8);
    let mut ledger = CostLedger::new();

    let executed = run_pending_calls(
        &registry,
        &ctx,
        vec![pending("echo", serde_json::json!({"text": "hi"}))],
        &mut ledger,
        &tx,
    )
    .await
    .unwrap();
    drop(tx);

    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].content, "hi");
    assert_eq!(ledger.tool_cost, CreditCount::new(3.5));

    let first = rx.recv().await.unwrap().unwrap();
    assert!(matches!(first, Chunk::Call(ref c) if c.name == "echo"));
    let second = rx.recv().await.unwrap().unwrap();
    assert!(matches!(second, Chunk::Item(_)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn unknown_names_are_excluded_from_the_resubmission_set() {
    let registry = ToolRegistry::new().register(Arc::new(EchoTool {
        cost: 1.0,
        item: false,
    }));
    let profile = AssistantProfile::default();
    let ctx = ToolContext {
        profile: &profile,
        files: &[],
    };
    let (tx, mut rx) = mpsc::channel(8);
    let mut ledger = CostLedger::new();

    let executed = run_pending_calls(
        &registry,
        &ctx,
        vec![
            pending("hallucinated_tool", serde_json::json!({})),
            pending("echo", serde_json::json!({"text": "kept"})),
        ],
        &mut ledger,
        &tx,
    )
    .await
    .unwrap();
    drop(tx);

    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].call.name, "echo");
    assert_eq!(ledger.tool_cost, CreditCount::new(1.0));

    // Only the known tool was announced.
    let only = rx.recv().await.unwrap().unwrap();
    assert!(matches!(only, Chunk::Call(ref c) if c.name == "echo"));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn tool_failure_propagates_with_cost_already_accrued() {
    let registry = ToolRegistry::new()
        .register(Arc::new(EchoTool {
            cost: 2.0,
            item: false,
        }));
    let profile = AssistantProfile::default();
    let ctx = ToolContext {
        profile: &profile,
        files: &[],
    };
    let (tx, _rx) = mpsc::channel(8);
    let mut ledger = CostLedger::new();

    let result = run_pending_calls(
        &registry,
        &ctx,
        vec![
            pending("echo", serde_json::json!({"text": "first"})),
            pending("echo", serde_json::json!({"wrong_key": true})),
        ],
        &mut ledger,
        &tx,
    )
    .await;

    assert!(result.is_err());
    // The first call completed and its cost stays on the ledger.
    assert_eq!(ledger.tool_cost, CreditCount::new(2.0));
}
