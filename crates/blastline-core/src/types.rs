//! Campaign data model — the core types for broadcast work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BlastlineError, Result};

/// Messaging platform a campaign targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Instagram,
    Facebook,
    Telegram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::WhatsApp => "whatsapp",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::Telegram => "telegram",
        }
    }

    pub const ALL: &'static [Platform] = &[
        Platform::WhatsApp,
        Platform::Instagram,
        Platform::Facebook,
        Platform::Telegram,
    ];
}

impl std::str::FromStr for Platform {
    type Err = BlastlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "whatsapp" => Ok(Platform::WhatsApp),
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            "telegram" => Ok(Platform::Telegram),
            other => Err(BlastlineError::Validation(format!(
                "Unknown platform: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What gets sent to each recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageSpec {
    /// Plain text body.
    Text { body: String },
    /// Hosted media with an optional caption.
    Media {
        media_type: String,
        url: String,
        #[serde(default)]
        caption: Option<String>,
    },
    /// Pre-approved template referenced by name, with substitution variables.
    Template {
        template_name: String,
        #[serde(default)]
        variables: Vec<String>,
    },
}

impl MessageSpec {
    /// Submission-time validation of the payload.
    pub fn validate(&self) -> Result<()> {
        match self {
            MessageSpec::Text { body } if body.trim().is_empty() => Err(
                BlastlineError::Validation("Text message body is empty".into()),
            ),
            MessageSpec::Media { url, .. } if url.trim().is_empty() => Err(
                BlastlineError::Validation("Media message has no URL".into()),
            ),
            MessageSpec::Template { template_name, .. } if template_name.trim().is_empty() => Err(
                BlastlineError::Validation("Template message has no template name".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// How recipients are selected for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum RecipientPolicy {
    /// Every active contact the owner has on the platform.
    All,
    /// Union of the listed groups, deduplicated per physical address.
    Groups(Vec<String>),
    /// An explicit contact id list, deduplicated.
    Contacts(Vec<String>),
}

/// When the campaign should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Now,
    Scheduled,
}

/// Campaign lifecycle status.
///
/// Allowed transitions: `draft -> scheduled | processing`,
/// `scheduled -> processing | cancelled`,
/// `processing -> completed | failed | cancelled`,
/// plus `draft | scheduled -> failed` when recipient resolution fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Whether the state machine allows `self -> to`.
    pub fn can_transition_to(&self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, to),
            (Draft, Scheduled)
                | (Draft, Processing)
                | (Draft, Failed)
                | (Scheduled, Processing)
                | (Scheduled, Cancelled)
                | (Scheduled, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = BlastlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "processing" => Ok(CampaignStatus::Processing),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(BlastlineError::Store(format!(
                "Unknown campaign status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-recipient delivery state.
///
/// Send path: `pending -> sent | failed`. Receipt path: `sent -> delivered
/// -> read`, with `sent -> read` auto-upgrading through delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Sent => "sent",
            TaskState::Delivered => "delivered",
            TaskState::Read => "read",
            TaskState::Failed => "failed",
        }
    }

}

impl std::str::FromStr for TaskState {
    type Err = BlastlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "sent" => Ok(TaskState::Sent),
            "delivered" => Ok(TaskState::Delivered),
            "read" => Ok(TaskState::Read),
            "failed" => Ok(TaskState::Failed),
            other => Err(BlastlineError::Store(format!("Unknown task state: {other}"))),
        }
    }
}

/// Asynchronous receipt event reported by a platform webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptEvent {
    Delivered,
    Read,
    Failed,
}

impl ReceiptEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptEvent::Delivered => "delivered",
            ReceiptEvent::Read => "read",
            ReceiptEvent::Failed => "failed",
        }
    }
}

/// A broadcast campaign — one bulk-message request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique campaign ID.
    pub id: String,
    /// Owner (tenant) the campaign belongs to.
    pub owner_id: String,
    /// Human-readable name.
    pub name: String,
    /// Target platform.
    pub platform: Platform,
    /// What gets sent to each recipient.
    pub message: MessageSpec,
    /// How recipients are selected.
    pub policy: RecipientPolicy,
    /// Immediate or scheduled start.
    pub schedule_type: ScheduleType,
    /// Start time — required iff `schedule_type` is `Scheduled`.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: CampaignStatus,
    /// Why the campaign failed, if it did.
    pub failure_reason: Option<String>,
    /// Size of the frozen recipient snapshot. Zero until promotion.
    pub total_recipients: u32,
    pub sent_count: u32,
    pub delivered_count: u32,
    pub read_count: u32,
    pub failed_count: u32,
    pub created_at: DateTime<Utc>,
    /// Set on entry to `processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entry to any terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create and validate a new campaign submission.
    ///
    /// `Now` campaigns start as `draft` and are promoted by the next sweep;
    /// `Scheduled` campaigns start as `scheduled`.
    pub fn new(
        owner_id: &str,
        name: &str,
        platform: Platform,
        message: MessageSpec,
        policy: RecipientPolicy,
        schedule_type: ScheduleType,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        message.validate()?;
        if name.trim().is_empty() {
            return Err(BlastlineError::Validation("Campaign name is empty".into()));
        }
        match (schedule_type, scheduled_at) {
            (ScheduleType::Scheduled, None) => {
                return Err(BlastlineError::Validation(
                    "Scheduled campaign requires scheduled_at".into(),
                ));
            }
            (ScheduleType::Now, Some(_)) => {
                return Err(BlastlineError::Validation(
                    "Immediate campaign must not set scheduled_at".into(),
                ));
            }
            _ => {}
        }
        if let RecipientPolicy::Groups(ids) | RecipientPolicy::Contacts(ids) = &policy {
            if ids.is_empty() {
                return Err(BlastlineError::Validation(
                    "Recipient policy lists no ids".into(),
                ));
            }
        }

        let status = match schedule_type {
            ScheduleType::Now => CampaignStatus::Draft,
            ScheduleType::Scheduled => CampaignStatus::Scheduled,
        };

        Ok(Self {
            id: format!("cmp-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            platform,
            message,
            policy,
            schedule_type,
            scheduled_at,
            status,
            failure_reason: None,
            total_recipients: 0,
            sent_count: 0,
            delivered_count: 0,
            read_count: 0,
            failed_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }
}

/// Per-recipient unit of delivery work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientTask {
    pub id: String,
    pub campaign_id: String,
    /// Platform-specific recipient address (phone number, chat id, PSID).
    pub recipient: String,
    pub state: TaskState,
    /// Send attempts made so far (includes the final one).
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Provider-assigned message id, set once the send is accepted.
    pub provider_message_id: Option<String>,
    /// Position in the frozen snapshot, preserved for FIFO dispatch.
    pub position: u32,
    pub updated_at: DateTime<Utc>,
}

impl RecipientTask {
    /// Create a pending task for one recipient of the frozen snapshot.
    pub fn new(campaign_id: &str, recipient: &str, position: u32) -> Self {
        Self {
            id: format!("rt-{}", uuid::Uuid::new_v4()),
            campaign_id: campaign_id.to_string(),
            recipient: recipient.to_string(),
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
            provider_message_id: None,
            position,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text() -> MessageSpec {
        MessageSpec::Text {
            body: "hello".into(),
        }
    }

    #[test]
    fn test_now_campaign_starts_as_draft() {
        let c = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            text(),
            RecipientPolicy::All,
            ScheduleType::Now,
            None,
        )
        .unwrap();
        assert_eq!(c.status, CampaignStatus::Draft);
        assert_eq!(c.total_recipients, 0);
    }

    #[test]
    fn test_scheduled_requires_time() {
        let err = Campaign::new(
            "o1",
            "promo",
            Platform::Telegram,
            text(),
            RecipientPolicy::All,
            ScheduleType::Scheduled,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            MessageSpec::Text { body: "  ".into() },
            RecipientPolicy::All,
            ScheduleType::Now,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_empty_group_list_rejected() {
        let err = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            text(),
            RecipientPolicy::Groups(vec![]),
            ScheduleType::Now,
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_status_transitions() {
        use CampaignStatus::*;
        assert!(Draft.can_transition_to(Processing));
        assert!(Draft.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Processing));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Cancelled));
        // terminal statuses never move
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Draft, Scheduled, Processing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(to));
            }
        }
        // no resurrection into draft/scheduled
        assert!(!Processing.can_transition_to(Draft));
        assert!(!Scheduled.can_transition_to(Draft));
    }

    #[test]
    fn test_message_spec_json_tagging() {
        let spec = MessageSpec::Template {
            template_name: "order_update".into(),
            variables: vec!["Ana".into()],
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "template");
        let back: MessageSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_policy_json_tagging() {
        let policy = RecipientPolicy::Groups(vec!["g1".into(), "g2".into()]);
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["kind"], "groups");
        assert_eq!(json["ids"][1], "g2");
        let all: RecipientPolicy = serde_json::from_str(r#"{"kind":"all"}"#).unwrap();
        assert_eq!(all, RecipientPolicy::All);
    }
}
