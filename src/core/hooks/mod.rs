mod observer;

pub use observer::ExecutionObserver;

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type HookFn<E> = Arc<dyn Fn(E) -> HookFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PreToolUse {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostToolUse {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub tool_call_id: String,
    pub tool_name: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Callbacks an agent runtime fires around every tool invocation.
/// Each one is optional; an unset hook is a no-op.
#[derive(Clone, Default)]
pub struct ToolHooks {
    pub on_pre_tool_use: Option<HookFn<PreToolUse>>,
    pub on_post_tool_use: Option<HookFn<PostToolUse>>,
    pub on_tool_failure: Option<HookFn<ToolFailure>>,
}

impl ToolHooks {
    pub fn none() -> Self {
        Self::default()
    }

    pub async fn pre_tool_use(&self, event: PreToolUse) {
        if let Some(hook) = &self.on_pre_tool_use {
            hook(event).await;
        }
    }

    pub async fn post_tool_use(&self, event: PostToolUse) {
        if let Some(hook) = &self.on_post_tool_use {
            hook(event).await;
        }
    }

    pub async fn tool_failure(&self, event: ToolFailure) {
        if let Some(hook) = &self.on_tool_failure {
            hook(event).await;
        }
    }
}

impl std::fmt::Debug for ToolHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHooks")
            .field("on_pre_tool_use", &self.on_pre_tool_use.is_some())
            .field("on_post_tool_use", &self.on_post_tool_use.is_some())
            .field("on_tool_failure", &self.on_tool_failure.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn unset_hooks_are_noops() {
        let hooks = ToolHooks::none();
        hooks
            .pre_tool_use(PreToolUse {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                input: serde_json::json!({}),
                at: Utc::now(),
            })
            .await;
        hooks
            .tool_failure(ToolFailure {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                error: "boom".into(),
                at: Utc::now(),
            })
            .await;
    }

    #[tokio::test]
    async fn only_configured_hook_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let hooks = ToolHooks {
            on_post_tool_use: Some(Arc::new(move |_event: PostToolUse| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as HookFuture
            })),
            ..ToolHooks::default()
        };

        hooks
            .post_tool_use(PostToolUse {
                tool_call_id: "c1".into(),
                tool_name: "search".into(),
                result: "ok".into(),
                at: Utc::now(),
            })
            .await;
        hooks
            .pre_tool_use(PreToolUse {
                tool_call_id: "c2".into(),
                tool_name: "search".into(),
                input: serde_json::json!({"q": 1}),
                at: Utc::now(),
            })
            .await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(format!("{:?}", hooks).contains("on_post_tool_use: true"));
    }
}
