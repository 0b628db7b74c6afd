use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::context::AppContext;
use crate::domain::ticket::TicketRecord;
use crate::error::AppResult;
use crate::workflow::ticket::{add_comment, change_status, show_ticket};

#[derive(Args, Debug, Clone)]
pub struct TicketArgs {
    #[command(subcommand)]
    pub command: TicketCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TicketCommand {
    /// Print a ticket with its comments and attachments.
    Show { id: String },
    /// Move a ticket to another status.
    Status { id: String, status: String },
    /// Add a comment, optionally with an attached file.
    Comment {
        id: String,
        body: String,
        #[arg(long)]
        attach: Option<PathBuf>,
    },
}

pub async fn run(ctx: &AppContext, command: TicketCommand) -> AppResult<()> {
    match command {
        TicketCommand::Show { id } => {
            let record = show_ticket(ctx, &id).await?;
            print!("{}", describe(&record));
        }
        TicketCommand::Status { id, status } => {
            let id = change_status(ctx, &id, &status).await?;
            println!("{id} moved to {}", status.trim());
        }
        TicketCommand::Comment { id, body, attach } => {
            let comment = add_comment(ctx, &id, &body, attach.as_deref()).await?;
            println!("Comment {} added to {}", comment.id, id.trim().to_uppercase());
        }
    }
    Ok(())
}

fn describe(record: &TicketRecord) -> String {
    let mut out = format!("{} [{}] {}\n", record.id, record.status, record.summary);
    if let Some(created) = record.created_at {
        out.push_str(&format!("Created: {}\n", created.format("%Y-%m-%d %H:%M")));
    }
    out.push('\n');
    if record.description_raw.trim().is_empty() {
        out.push_str("(no description)\n");
    } else {
        out.push_str(record.description_raw.trim_end());
        out.push('\n');
    }
    if !record.attachments.is_empty() {
        out.push_str("\nAttachments:\n");
        for attachment in &record.attachments {
            out.push_str(&format!("  - {}\n", attachment.filename));
        }
    }
    if !record.comments.is_empty() {
        out.push_str("\nComments:\n");
        for comment in &record.comments {
            out.push_str(&format!(
                "  {} ({}):\n    {}\n",
                comment.author,
                comment.created_at.format("%Y-%m-%d %H:%M"),
                comment.body_raw.trim().replace('\n', "\n    ")
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{attachment, comment, ticket};

    #[test]
    fn describes_ticket_with_comments_and_attachments() {
        let mut record = ticket("WEB-4", "In Progress", "line one\nline two");
        record.attachments = vec![attachment("9", "shot.png")];
        record.comments = vec![comment("c1", "first\nsecond", 3)];

        let text = describe(&record);

        assert!(text.starts_with("WEB-4 [In Progress]"));
        assert!(text.contains("line one\nline two\n"));
        assert!(text.contains("  - shot.png\n"));
        assert!(text.contains("first\n    second"));
    }

    #[test]
    fn empty_description_is_called_out() {
        let text = describe(&ticket("WEB-5", "To Do", "  "));
        assert!(text.contains("(no description)"));
    }
}
