use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Comment ids are local to a thread.
pub type Id = i64;

pub const MAX_TEXT_LEN: usize = 65_535;
pub const MAX_AUTHOR_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_WEBSITE_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub thread: String,
    pub parent: Option<Id>,
    pub text: String,
    pub author: Option<String>,
    pub website: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub pending: bool,
    pub deleted: bool,
}

impl Comment {
    /// Turn the record into a tombstone: keep position in the reply tree, drop the content.
    pub fn redact(&mut self) {
        self.deleted = true;
        self.text.clear();
        self.author = None;
        self.website = None;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub text: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub parent: Option<Id>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("text must not be empty".into());
        }
        check_len("text", Some(&self.text), MAX_TEXT_LEN)?;
        check_len("author", self.author.as_deref(), MAX_AUTHOR_LEN)?;
        check_len("email", self.email.as_deref(), MAX_EMAIL_LEN)?;
        check_len("website", self.website.as_deref(), MAX_WEBSITE_LEN)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateComment {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl UpdateComment {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(text) = &self.text {
            if text.trim().is_empty() {
                return Err("text must not be empty".into());
            }
        }
        check_len("text", self.text.as_deref(), MAX_TEXT_LEN)?;
        check_len("author", self.author.as_deref(), MAX_AUTHOR_LEN)?;
        check_len("website", self.website.as_deref(), MAX_WEBSITE_LEN)
    }

    pub fn apply(self, c: &mut Comment) {
        if let Some(text) = self.text { c.text = text; }
        if let Some(author) = self.author { c.author = Some(author); }
        if let Some(website) = self.website { c.website = Some(website); }
        c.modified = Some(Utc::now());
    }
}

fn check_len(field: &str, value: Option<&str>, max: usize) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > max => Err(format!("{field} exceeds {max} characters")),
        _ => Ok(()),
    }
}

/// Who is asking to mutate a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Anonymous caller; carries the ownership cookie value if one was sent.
    Owner(Option<String>),
    /// Verified moderator or admin.
    Privileged,
}
