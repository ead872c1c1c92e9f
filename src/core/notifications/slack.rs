use super::NotificationChannel;
use crate::core::events::{EventKind, WorkflowEvent};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &WorkflowEvent) -> serde_json::Value {
        let (title, label) = match event.kind {
            EventKind::Complete => ("Volume Ready", "Status"),
            EventKind::Error => ("Volume Failed", "Error"),
            _ => ("Volume Update", "Message"),
        };

        json!({
            "blocks": [
                {
                    "type": "header",
                    "text": {
                        "type": "plain_text",
                        "text": title,
                        "emoji": true
                    }
                },
                {
                    "type": "section",
                    "fields": [
                        {
                            "type": "mrkdwn",
                            "text": format!("*Volume:*\n`{}`", event.volume_id)
                        },
                        {
                            "type": "mrkdwn",
                            "text": format!("*Time:*\n{}", event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"))
                        }
                    ]
                },
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("*{}:*\n```{}```", label, event.message)
                    }
                }
            ]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: WorkflowEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
