//! End-to-end tool loop scenarios.
//!
//! Each test drives a full turn against a scripted model, real built-in tools
//! and a conversation store in a temporary directory.

use serde_json::{json, Value};
use sidecode_core::{
    Approval, ConversationStore, CoreError, LoopConfig, OperationStatus, StoredMessage, ToolLoop,
    TurnStatus,
};
use sidecode_provider::{
    BoxedLanguageModel, ContentPart, Message, ProviderError, Role, ToolCall, ToolDefinition,
};
use sidecode_storage::{Cipher, CryptoError, JsonStorage, StorageError};
use sidecode_test_utils::{BuiltTestProject, RecordingProvider, ScriptedResponse, TestProject};
use sidecode_tools::{ToolError, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    project: BuiltTestProject,
    provider: RecordingProvider,
    store: Arc<ConversationStore>,
    tool_loop: ToolLoop,
}

impl Harness {
    fn new(provider: RecordingProvider) -> Self {
        Self::with_registry(provider, ToolRegistry::with_builtins())
    }

    fn with_registry(provider: RecordingProvider, registry: ToolRegistry) -> Self {
        let project = TestProject::new()
            .with_rust_project("demo")
            .with_file("README.md", "# demo\n")
            .build();
        let store = Arc::new(ConversationStore::new(JsonStorage::new(project.data_dir())));
        let model: BoxedLanguageModel = Arc::new(provider.clone());
        let tool_loop = ToolLoop::new(
            store.clone(),
            model,
            Arc::new(registry),
            project.tool_context(),
        );
        Self {
            project,
            provider,
            store,
            tool_loop,
        }
    }

    async fn conversation(&self) -> String {
        self.store.create("scenario").await.unwrap().id
    }

    async fn turn(&self, id: &str, text: &str, config: &LoopConfig) -> Result<TurnStatus, CoreError> {
        self.tool_loop
            .run_turn(id, text, config, CancellationToken::new())
            .await
            .map(|outcome| outcome.status)
    }

    /// The store as a fresh process would see it.
    fn reopened(&self) -> ConversationStore {
        ConversationStore::new(JsonStorage::new(self.project.data_dir()))
    }
}

fn tool_results(request_messages: &[sidecode_provider::Message]) -> Vec<(String, bool, Value)> {
    request_messages
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .flat_map(|m| m.content.iter())
        .filter_map(|part| match part {
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.clone(), *is_error, content.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_list_files_round_trip() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "list_files", json!({"path": "."}))
        .with_response("Files: Cargo.toml, README.md, src/");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "What files are here?", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.rounds, 2);
    assert!(outcome.text().contains("README.md"));
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(!outcome.tool_results[0].is_error);

    // The second request carries exactly one tool result, answering call_1
    let calls = h.provider.calls();
    assert_eq!(calls.len(), 2);
    let results = tool_results(&calls[1].messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "call_1");
    assert!(results[0].2.to_string().contains("README.md"));

    let conversation = h.store.get(&id).await.unwrap();
    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role()).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
    );
    assert_eq!(conversation.stats.input_tokens, 200);
    assert_eq!(conversation.stats.output_tokens, 40);
    assert_eq!(conversation.stats.provider.as_deref(), Some("recording"));
}

#[tokio::test]
async fn test_read_outside_root_is_error_result() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "read_file", json!({"path": "../../../../etc/passwd"}))
        .with_response("I can't read that.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "Show me /etc/passwd", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    let result = &outcome.tool_results[0];
    assert!(result.is_error);
    assert!(result.content_text().contains("sandbox"));
    assert!(!result.content_text().contains("root:x:0:0"));
}

#[tokio::test]
async fn test_denied_command_never_runs() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "run_command", json!({"command": "rm -rf /"}))
        .with_response("That command is not allowed.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "wipe everything", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    let result = &outcome.tool_results[0];
    assert!(result.is_error);
    assert!(result.content_text().starts_with("Command denied"));
    assert!(h.project.file_exists("README.md"));
}

#[tokio::test]
async fn test_write_then_run_command() {
    let provider = RecordingProvider::new()
        .with_tool_calls(vec![ToolCall::new(
            "call_1",
            "write_file",
            json!({"path": "notes/hello.txt", "content": "hello from the loop\n"}),
        )])
        .with_tool_call("call_2", "run_command", json!({"command": "cat notes/hello.txt"}))
        .with_response("Done.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "write a note", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.rounds, 3);
    assert_eq!(h.project.read_file("notes/hello.txt"), "hello from the loop\n");
    let output = &outcome.tool_results[1];
    assert!(!output.is_error);
    assert_eq!(output.content["output"], "hello from the loop\n");
    assert_eq!(output.content["exit_code"], 0);
}

#[tokio::test]
async fn test_loop_limit() {
    let provider = RecordingProvider::new().always_calling("list_files", json!({}));
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let config = LoopConfig::default().with_max_rounds(3);

    let outcome = h
        .tool_loop
        .run_turn(&id, "keep going", &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::LoopLimitExceeded);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(h.provider.call_count(), 3);
    assert_eq!(outcome.tool_results.len(), 2);

    // The last calls are answered without running
    let conversation = h.store.get(&id).await.unwrap();
    let last = conversation.messages.last().unwrap();
    assert_eq!(last.role(), Role::ToolResult);
    let results = tool_results(std::slice::from_ref(&last.message));
    assert!(results[0].1);
    assert!(results[0].2.as_str().unwrap().contains("round limit"));
}

#[tokio::test]
async fn test_unknown_tool_is_error_result() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "launch_rockets", json!({}))
        .with_response("No rockets.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let status = h.turn(&id, "launch", &LoopConfig::default()).await.unwrap();
    assert_eq!(status, TurnStatus::Completed);

    let results = tool_results(&h.provider.last_call().unwrap().messages);
    assert!(results[0].1);
    assert_eq!(results[0].2, json!("unknown tool: launch_rockets"));
}

#[tokio::test]
async fn test_invalid_arguments_are_error_result() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "read_file", json!({"file": "README.md"}))
        .with_response("Retrying would help.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    h.turn(&id, "read it", &LoopConfig::default()).await.unwrap();
    let results = tool_results(&h.provider.last_call().unwrap().messages);
    assert!(results[0].1);
    assert!(results[0].2.as_str().unwrap().contains("schema validation failed"));
}

fn slow_and_panicking_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::with_builtins();
    let empty = json!({"type": "object", "properties": {}});
    registry.register_fn(
        ToolDefinition {
            name: "slow".into(),
            description: "Sleeps for a long time".into(),
            parameters: empty.clone(),
        },
        |_args, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<Value, ToolError>(json!("finished"))
        },
    );
    registry.register_fn(
        ToolDefinition {
            name: "explode".into(),
            description: "Panics".into(),
            parameters: empty,
        },
        |args: Value, _ctx| async move {
            if args.get("safe").is_none() {
                panic!("tool exploded");
            }
            Ok::<Value, ToolError>(json!("survived"))
        },
    );
    registry
}

#[tokio::test]
async fn test_tool_timeout_and_panic_become_error_results() {
    let provider = RecordingProvider::new()
        .with_tool_calls(vec![
            ToolCall::new("call_slow", "slow", json!({})),
            ToolCall::new("call_boom", "explode", json!({})),
        ])
        .with_response("Both tools failed.");
    let h = Harness::with_registry(provider, slow_and_panicking_registry());
    let id = h.conversation().await;
    let mut config = LoopConfig::default();
    config.tool_timeout = Duration::from_millis(100);

    let outcome = h
        .tool_loop
        .run_turn(&id, "try them", &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    let [slow, boom] = outcome.tool_results.as_slice() else {
        panic!("expected two results, got {:?}", outcome.tool_results);
    };
    assert!(slow.is_error);
    assert!(slow.content_text().contains("Timed out"));
    assert!(boom.is_error);
    assert!(boom.content_text().contains("panicked"));
}

#[tokio::test]
async fn test_manual_mode_runs_nothing_before_approval() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_read", "read_file", json!({"path": "README.md"}))
        .with_response("It is a demo project.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "what is this?", &LoopConfig::default().manual(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::AwaitingApproval);
    assert_eq!(outcome.rounds, 1);
    assert_eq!(h.provider.call_count(), 1);
    assert!(outcome.tool_results.is_empty());
    let pending: Vec<&str> = outcome.pending.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(pending, vec!["call_read"]);

    let conversation = h.store.get(&id).await.unwrap();
    assert!(conversation.messages.iter().all(|m| m.role() != Role::ToolResult));
}

#[tokio::test]
async fn test_manual_mode_can_auto_approve_read_only_batches() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_read", "read_file", json!({"path": "README.md"}))
        .with_response("It is a demo project.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let mut config = LoopConfig::default().manual();
    config.auto_approve_read_only = true;

    let outcome = h
        .tool_loop
        .run_turn(&id, "what is this?", &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.tool_results.len(), 1);
    assert!(outcome.pending.is_empty());
}

#[tokio::test]
async fn test_manual_mode_approve() {
    let provider = RecordingProvider::new()
        .with_tool_calls(vec![
            ToolCall::new(
                "call_write",
                "write_file",
                json!({"path": "CHANGELOG.md", "content": "## 0.1.0\n"}),
            ),
            ToolCall::new("call_read", "read_file", json!({"path": "README.md"})),
        ])
        .with_response("Changelog created.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let mut config = LoopConfig::default().manual();
    config.auto_approve_read_only = true;

    let outcome = h
        .tool_loop
        .run_turn(&id, "add a changelog", &config, CancellationToken::new())
        .await
        .unwrap();

    // One mutating call holds the whole batch, read included
    assert_eq!(outcome.status, TurnStatus::AwaitingApproval);
    assert!(outcome.tool_results.is_empty());
    assert_eq!(outcome.pending.len(), 2);
    assert!(!h.project.file_exists("CHANGELOG.md"));

    // Pending operations survive a restart
    let reopened = h.reopened().load(&id).await.unwrap();
    let ops: Vec<_> = reopened.pending_operations().cloned().collect();
    let call_ids: Vec<&str> = ops.iter().map(|op| op.call.id.as_str()).collect();
    assert_eq!(call_ids, vec!["call_write", "call_read"]);

    let approvals: Vec<Approval> = ops.iter().map(|op| Approval::approve(&op.id)).collect();
    let outcome = h
        .tool_loop
        .resolve_pending(&id, &approvals, &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.text(), "Changelog created.");
    assert_eq!(h.project.read_file("CHANGELOG.md"), "## 0.1.0\n");

    // Results are stored in the order the calls were issued
    let results = tool_results(&h.provider.last_call().unwrap().messages);
    let order: Vec<&str> = results.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(order, vec!["call_write", "call_read"]);
    assert!(results.iter().all(|r| !r.1));

    let conversation = h.store.get(&id).await.unwrap();
    assert!(!conversation.has_pending());
    assert!(conversation
        .pending
        .iter()
        .all(|op| op.status == OperationStatus::Approved));
}

#[tokio::test]
async fn test_approved_command_skips_confirmation() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_rm", "run_command", json!({"command": "rm README.md"}))
        .with_response("Removed it.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let config = LoopConfig::default().manual();

    h.turn(&id, "delete the readme", &config).await.unwrap();
    let op_id = h
        .store
        .get(&id)
        .await
        .unwrap()
        .pending_operations()
        .next()
        .unwrap()
        .id
        .clone();

    let outcome = h
        .tool_loop
        .resolve_pending(&id, &[Approval::approve(&op_id)], &config, CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.tool_results[0].is_error, "{:?}", outcome.tool_results[0]);
    assert!(!h.project.file_exists("README.md"));
}

#[tokio::test]
async fn test_approved_command_still_obeys_denylist() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_rm", "run_command", json!({"command": "bash -c 'rm -rf src'"}))
        .with_response("Could not do that.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let config = LoopConfig::default().manual();

    h.turn(&id, "wipe src", &config).await.unwrap();
    let op_id = h
        .store
        .get(&id)
        .await
        .unwrap()
        .pending_operations()
        .next()
        .unwrap()
        .id
        .clone();

    let outcome = h
        .tool_loop
        .resolve_pending(&id, &[Approval::approve(&op_id)], &config, CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.tool_results[0].is_error);
    assert!(outcome.tool_results[0].content_text().starts_with("Command denied"));
    assert!(h.project.file_exists("src/main.rs"));
}

#[tokio::test]
async fn test_manual_mode_reject() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_rm", "run_command", json!({"command": "touch marker"}))
        .with_response("Okay, I won't.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let config = LoopConfig::default().manual();

    let outcome = h
        .tool_loop
        .run_turn(&id, "make a marker", &config, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, TurnStatus::AwaitingApproval);
    let op_id = h
        .store
        .get(&id)
        .await
        .unwrap()
        .pending_operations()
        .next()
        .unwrap()
        .id
        .clone();

    let outcome = h
        .tool_loop
        .resolve_pending(&id, &[Approval::reject(&op_id)], &config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert!(!h.project.file_exists("marker"));
    assert_eq!(outcome.tool_results[0].content_text(), "rejected by user");
}

#[tokio::test]
async fn test_resolve_errors() {
    let h = Harness::new(RecordingProvider::new());
    let id = h.conversation().await;
    let config = LoopConfig::default().manual();

    let err = h
        .tool_loop
        .resolve_pending(&id, &[], &config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no pending operations"));

    let h = Harness::new(
        RecordingProvider::new().with_tool_call("c", "write_file", json!({"path": "a", "content": ""})),
    );
    let id = h.conversation().await;
    h.turn(&id, "write", &config).await.unwrap();
    let err = h
        .tool_loop
        .resolve_pending(&id, &[Approval::approve("op_missing")], &config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("op_missing"));
}

#[tokio::test]
async fn test_new_turn_supersedes_pending() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_w", "write_file", json!({"path": "x.txt", "content": "x"}))
        .with_response("Never mind then.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    let config = LoopConfig::default().manual();

    h.turn(&id, "write x", &config).await.unwrap();
    let status = h.turn(&id, "actually, don't", &config).await.unwrap();
    assert_eq!(status, TurnStatus::Completed);

    let results = tool_results(&h.provider.last_call().unwrap().messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "call_w");
    assert!(results[0].2.as_str().unwrap().contains("superseded"));
    assert!(!h.project.file_exists("x.txt"));
}

#[tokio::test]
async fn test_cancelled_turn_keeps_user_message() {
    let h = Harness::new(RecordingProvider::new().with_hang());
    let id = h.conversation().await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = h
        .tool_loop
        .run_turn(&id, "this will be cancelled", &LoopConfig::default(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));

    let persisted = h.reopened().load(&id).await.unwrap();
    assert_eq!(persisted.messages.len(), 1);
    assert_eq!(persisted.messages[0].message.text(), "this will be cancelled");
}

#[tokio::test]
async fn test_round_timeout() {
    let h = Harness::new(RecordingProvider::new().with_hang());
    let id = h.conversation().await;
    let mut config = LoopConfig::default();
    config.round_timeout = Duration::from_millis(50);

    let err = h.turn(&id, "hello?", &config).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout(_)));
}

#[tokio::test]
async fn test_provider_error_propagates_after_persisting() {
    let h = Harness::new(RecordingProvider::new().with_error("overloaded"));
    let id = h.conversation().await;

    let err = h.turn(&id, "hello", &LoopConfig::default()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Provider(ProviderError::ApiError { status: 500, .. })
    ));
    let persisted = h.reopened().load(&id).await.unwrap();
    assert_eq!(persisted.messages.len(), 1);
}

#[tokio::test]
async fn test_slow_provider_within_deadline() {
    let provider = RecordingProvider::new().with_scripted(ScriptedResponse::Delayed(
        Duration::from_millis(20),
        Box::new(ScriptedResponse::Text("eventually".into())),
    ));
    let h = Harness::new(provider);
    let id = h.conversation().await;

    let outcome = h
        .tool_loop
        .run_turn(&id, "hi", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.text(), "eventually");
}

#[tokio::test]
async fn test_persist_load_round_trip() {
    let provider = RecordingProvider::new()
        .with_tool_call("call_1", "search_code", json!({"pattern": "println"}))
        .with_response("Found it in main.rs.");
    let h = Harness::new(provider);
    let id = h.conversation().await;
    h.turn(&id, "where do we print?", &LoopConfig::default())
        .await
        .unwrap();

    let live = h.store.get(&id).await.unwrap();
    let loaded = h.reopened().load(&id).await.unwrap();
    let messages = |c: &sidecode_core::Conversation| {
        c.messages
            .iter()
            .map(|m| (m.id.clone(), m.message.clone(), m.timestamp))
            .collect::<Vec<_>>()
    };
    assert_eq!(messages(&live), messages(&loaded));
    assert_eq!(live.stats.input_tokens, loaded.stats.input_tokens);
    assert_eq!(live.time, loaded.time);

    // Loading twice gives the same context, never starting with a tool result
    let store = h.reopened();
    let first = store.context_slice(&id, 2).await.unwrap();
    let second = store.context_slice(&id, 2).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].role(), Role::Assistant);
}

#[tokio::test]
async fn test_second_turn_sees_history() {
    let provider = RecordingProvider::new()
        .with_response("First answer.")
        .with_response("Second answer.");
    let h = Harness::new(provider);
    let id = h.conversation().await;

    h.turn(&id, "first question", &LoopConfig::default()).await.unwrap();
    h.turn(&id, "second question", &LoopConfig::default()).await.unwrap();

    let last = h.provider.last_call().unwrap();
    let texts: Vec<String> = last.messages.iter().map(|m| m.text()).collect();
    assert_eq!(
        texts,
        vec!["first question", "First answer.", "second question"]
    );
    assert!(last.system.is_some());
    assert!(!last.tools.is_empty());
}

#[tokio::test]
async fn test_encrypted_conversation() {
    let project = TestProject::new().build();
    let encrypted = || {
        JsonStorage::new(project.data_dir()).with_cipher(Cipher::new("correct horse").unwrap())
    };
    let store = Arc::new(ConversationStore::new(encrypted()));
    let provider = RecordingProvider::new().with_response("secret reply");
    let tool_loop = ToolLoop::new(
        store.clone(),
        Arc::new(provider),
        Arc::new(ToolRegistry::with_builtins()),
        project.tool_context(),
    );
    let id = store.create("secret").await.unwrap().id;
    tool_loop
        .run_turn(&id, "secret question", &LoopConfig::default(), CancellationToken::new())
        .await
        .unwrap();

    let raw = std::fs::read_to_string(project.data_dir().join(format!("conversation/{id}.json")))
        .unwrap();
    assert!(!raw.contains("secret question"));

    // Right passphrase
    let loaded = ConversationStore::new(encrypted()).load(&id).await.unwrap();
    assert_eq!(loaded.last_assistant_text().as_deref(), Some("secret reply"));

    // Wrong passphrase is not the same as a missing conversation
    let wrong = ConversationStore::new(
        JsonStorage::new(project.data_dir()).with_cipher(Cipher::new("wrong").unwrap()),
    );
    let err = wrong.load(&id).await.unwrap_err();
    assert!(!err.is_not_found());
    assert!(matches!(
        err,
        CoreError::Persistence(StorageError::Crypto(CryptoError::Decryption))
    ));

    // No passphrase at all
    let err = ConversationStore::new(JsonStorage::new(project.data_dir()))
        .load(&id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Persistence(StorageError::Encrypted(_))));

    let err = wrong.load("cnv_missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_concurrent_appends_are_serialized() {
    let project = TestProject::new().build();
    let store = Arc::new(ConversationStore::new(JsonStorage::new(project.data_dir())));
    let id = store.create("busy").await.unwrap().id;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let message = StoredMessage::new(Message::user(format!("message {i}")));
                store.append(&id, message).await.unwrap();
                store.persist(&id).await.unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let live = store.get(&id).await.unwrap();
    assert_eq!(live.messages.len(), 16);
    let mut texts: Vec<String> = live.messages.iter().map(|m| m.message.text()).collect();
    texts.sort();
    texts.dedup();
    assert_eq!(texts.len(), 16);

    // The last write holds every message, in append order
    let loaded = ConversationStore::new(JsonStorage::new(project.data_dir()))
        .load(&id)
        .await
        .unwrap();
    let ids = |c: &sidecode_core::Conversation| {
        c.messages.iter().map(|m| m.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&live), ids(&loaded));
}
