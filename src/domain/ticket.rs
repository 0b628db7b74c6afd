use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

/// Issue key such as `PROJ-12`, always stored trimmed and uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(String);

impl TicketId {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let normalized = raw.trim().to_uppercase();
        if Self::is_well_formed(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(AppError::Validation(format!(
                "'{}' is not a ticket key (expected LETTERS-DIGITS)",
                raw.trim()
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_well_formed(value: &str) -> bool {
        let Some((project, number)) = value.split_once('-') else {
            return false;
        };
        !project.is_empty()
            && !number.is_empty()
            && project.chars().all(|c| c.is_ascii_uppercase())
            && number.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketRecord {
    pub id: TicketId,
    pub status: String,
    pub summary: String,
    pub description_raw: String,
    pub comments: Vec<CommentRecord>,
    pub created_at: Option<DateTime<Utc>>,
    pub attachments: Vec<AttachmentRef>,
}

pub fn find_attachment<'a>(attachments: &'a [AttachmentRef], filename: &str) -> Option<&'a AttachmentRef> {
    attachments.iter().find(|attachment| attachment.filename == filename)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub id: String,
    pub author: String,
    pub body_raw: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentBlob {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_ticket_key() {
        let id = TicketId::parse("  proj-42 ").expect("valid key");
        assert_eq!(id.as_str(), "PROJ-42");
        assert_eq!(id, TicketId::parse("PROJ-42").expect("valid key"));
    }

    #[test]
    fn rejects_malformed_ticket_keys() {
        for raw in ["", "PROJ", "PROJ-", "-12", "PROJ-1a", "PR0J-1", "PROJ 1"] {
            let error = TicketId::parse(raw).expect_err("should be rejected");
            assert!(matches!(error, AppError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn finds_attachment_by_exact_filename() {
        let attachments = vec![
            AttachmentRef {
                id: "10".to_string(),
                filename: "shot.png".to_string(),
            },
            AttachmentRef {
                id: "11".to_string(),
                filename: "Shot.png".to_string(),
            },
        ];
        assert_eq!(
            find_attachment(&attachments, "Shot.png").map(|a| a.id.as_str()),
            Some("11")
        );
        assert!(find_attachment(&attachments, "missing.png").is_none());
    }
}
