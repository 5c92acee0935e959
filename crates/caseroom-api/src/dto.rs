// SPDX-License-Identifier: Apache-2.0

use caseroom_model::{Role, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRequest {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCaseRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantAccessRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddStudentsRequest {
    pub emails: Vec<String>,
}

/// Tagged boundary input for the student-add operation. The handler
/// resolves the request content type into exactly one variant; everything
/// past the boundary dispatches on this, not on headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddStudentsInput {
    Json(AddStudentsRequest),
    Csv(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAssistantRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminAssignRequest {
    pub email: String,
    pub case_id: String,
}

/// Per-row outcome report for bulk imports. A subset of failed rows is a
/// 200 with this body, never a request-level error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportReport {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(error.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub message_history: Option<Vec<ChatMessage>>,
    pub assistant_id: String,
    pub case_id: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// History and a fresh prompt are mutually exclusive framings: with history
/// the list is `[system] + history + [user]`, without it `[system, user]`.
#[must_use]
pub fn compose_messages(
    instructions: &str,
    history: Option<&[ChatMessage]>,
    prompt: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(instructions)];
    if let Some(history) = history.filter(|h| !h.is_empty()) {
        messages.extend(history.iter().cloned());
    }
    messages.push(ChatMessage::user(prompt));
    messages
}
