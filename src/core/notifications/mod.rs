mod slack;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::warn;

use super::events::{EventSink, WorkflowEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

/// Trait for notification channel implementations (Slack, Discord, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: WorkflowEvent) -> Result<()>;
}

/// Factory function to create a notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(slack::SlackNotifier::new(webhook.clone())))
        }
    }
}

/// Event sink that forwards terminal workflow events (`Complete`, `Error`)
/// to a notification channel on a background task.
pub struct NotifyingSink {
    channel: Arc<dyn NotificationChannel>,
    runtime: Handle,
}

impl NotifyingSink {
    /// Must be called from within a tokio runtime.
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            channel,
            runtime: Handle::current(),
        }
    }
}

impl EventSink for NotifyingSink {
    fn notify(&self, event: WorkflowEvent) {
        if !event.kind.is_terminal() {
            return;
        }

        let channel = self.channel.clone();
        self.runtime.spawn(async move {
            let volume = event.volume_id.clone();
            if let Err(e) = channel.notify(event).await {
                warn!(volume = %volume, error = %e, "Failed to send notification");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventKind;
    use tokio::sync::mpsc;

    struct Recorder(mpsc::UnboundedSender<WorkflowEvent>);

    #[async_trait]
    impl NotificationChannel for Recorder {
        async fn notify(&self, event: WorkflowEvent) -> Result<()> {
            let _ = self.0.send(event);
            Ok(())
        }
    }

    #[test]
    fn test_create_notifier_requires_webhook() {
        assert!(create_notifier(&NotificationConfig::default()).is_none());

        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some(String::new()),
        };
        assert!(create_notifier(&config).is_none());

        let config = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some("https://hooks.slack.com/services/T/B/X".to_string()),
        };
        assert!(create_notifier(&config).is_some());
    }

    #[tokio::test]
    async fn test_notifying_sink_forwards_terminal_events_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = NotifyingSink::new(Arc::new(Recorder(tx)));

        sink.notify(WorkflowEvent::new(EventKind::Progress, "v1", "copying"));
        sink.notify(WorkflowEvent::new(EventKind::Complete, "v1", "done"));

        let forwarded = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout waiting for notification")
            .expect("channel closed");
        assert_eq!(forwarded.kind, EventKind::Complete);
        assert!(rx.try_recv().is_err());
    }
}
