// src/models/support.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString, VariantNames};

use super::{transition_allowed, Lifecycle};
use crate::auth::permissions;
use crate::error::{ApiError, ApiResult};
use crate::input::InputMap;
use crate::repositories::{col, Column, ColumnKind, Resource};
use crate::validator::template_placeholders;

// ==================== SUPPORT TICKET ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl Lifecycle for TicketStatus {
    fn next(&self) -> &'static [Self] {
        use TicketStatus::*;
        match self {
            Open => &[InProgress, Resolved, Closed],
            InProgress => &[Open, Resolved, Closed],
            Resolved => &[Open, Closed],
            Closed => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, VariantNames)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Default)]
pub struct SupportTickets;

const TICKET_COLUMNS: &[Column] = &[
    col("subject", ColumnKind::Text),
    col("description", ColumnKind::Text),
    col("category", ColumnKind::Text),
    col("priority", ColumnKind::Enum(TicketPriority::VARIANTS)),
    col("status", ColumnKind::Enum(TicketStatus::VARIANTS)),
    col("requester_name", ColumnKind::Text),
    col("requester_email", ColumnKind::Email),
    col("assigned_to", ColumnKind::Text),
    col("resolution", ColumnKind::Text),
    col("resolved_at", ColumnKind::DateTime),
];

impl Resource for SupportTickets {
    fn table_name(&self) -> &'static str {
        "support_tickets"
    }

    fn label(&self) -> &'static str {
        "Ticket"
    }

    fn columns(&self) -> &'static [Column] {
        TICKET_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[("subject", "Subject is required"), ("description", "Description is required")]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["subject", "description", "requester_name"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["status", "priority", "category", "assigned_to"]
    }

    fn date_field(&self) -> Option<&'static str> {
        Some("created_at")
    }

    fn soft_delete(&self) -> bool {
        true
    }

    fn status_field(&self) -> Option<&'static str> {
        Some("status")
    }

    fn status_stamps(&self) -> &'static [(&'static str, &'static str)] {
        &[("resolved", "resolved_at")]
    }

    fn can_transition(&self, from: &str, to: &str) -> bool {
        transition_allowed::<TicketStatus>(from, to)
    }

    fn view_permission(&self) -> &'static str {
        permissions::SUPPORT_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::SUPPORT_MANAGE
    }
}

// ==================== MESSAGE TEMPLATE ====================

#[derive(Debug, Default)]
pub struct MessageTemplates;

const TEMPLATE_COLUMNS: &[Column] = &[
    col("name", ColumnKind::Text),
    col("channel", ColumnKind::Enum(&["sms", "email"])),
    col("subject", ColumnKind::Text),
    col("body", ColumnKind::Text),
    col("is_active", ColumnKind::Bool),
];

impl Resource for MessageTemplates {
    fn table_name(&self) -> &'static str {
        "message_templates"
    }

    fn label(&self) -> &'static str {
        "Message template"
    }

    fn columns(&self) -> &'static [Column] {
        TEMPLATE_COLUMNS
    }

    fn required_fields(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("name", "Template name is required"),
            ("channel", "Channel is required"),
            ("body", "Template body is required"),
        ]
    }

    fn search_fields(&self) -> &'static [&'static str] {
        &["name", "subject", "body"]
    }

    fn filter_fields(&self) -> &'static [&'static str] {
        &["channel", "is_active"]
    }

    fn default_sort(&self) -> (&'static str, &'static str) {
        ("name", "ASC")
    }

    fn view_permission(&self) -> &'static str {
        permissions::TEMPLATES_VIEW
    }

    fn manage_permission(&self) -> &'static str {
        permissions::TEMPLATES_MANAGE
    }

    fn validate(&self, record: &InputMap) -> ApiResult<()> {
        let channel = record.get("channel").and_then(Value::as_str);
        let has_subject = record.get("subject").map(|v| !v.is_null()).unwrap_or(false);
        if channel == Some("email") && !has_subject {
            return Err(ApiError::BadRequest("Email templates need a subject".to_string()));
        }
        let body = record.get("body").and_then(Value::as_str).unwrap_or_default();
        if body.contains("{{") && template_placeholders(body).is_empty() {
            return Err(ApiError::BadRequest(
                "Template body has a malformed placeholder".to_string(),
            ));
        }
        Ok(())
    }
}
