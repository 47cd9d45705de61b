//! Attachment handling: classify, download and fold files into a message.
//!
//! Attachment problems never fail a request. Each file ends up inlined,
//! replaced by a short note, or dropped, and the typed text always goes
//! through.

mod classify;
mod fetch;

use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

pub use classify::{
    AttachmentKind, AttachmentMeta, AttachmentPart, Classification, MAX_ATTACHMENT_SIZE,
    RejectReason, assemble, build_part, classify, classify_with_limit, rejected_note,
    unsupported_note,
};
pub use fetch::{AttachmentFetcher, FetchError, HttpFetcher};

use crate::llm::MessageContent;

/// A file referenced by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub url: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl AttachmentRef {
    fn meta(&self) -> AttachmentMeta {
        AttachmentMeta {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size.unwrap_or(0),
        }
    }
}

impl From<chatrelay_gateway_protocol::MediaPayload> for AttachmentRef {
    fn from(media: chatrelay_gateway_protocol::MediaPayload) -> Self {
        Self {
            url: media.url,
            name: media.name,
            mime_type: media.mime_type,
            size: media.size,
        }
    }
}

/// What happened to one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttachmentOutcome {
    Included { name: String, kind: AttachmentKind },
    Rejected { name: String, reason: RejectReason },
    Failed { name: String, error: String },
}

/// The outbound user message after attachment processing.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub content: MessageContent,
    pub outcomes: Vec<AttachmentOutcome>,
}

/// Classify, download and assemble the attachments of one message.
///
/// Downloads run concurrently. Results keep the attachments' original order.
pub async fn prepare_message(
    fetcher: &dyn AttachmentFetcher,
    text: &str,
    attachments: &[AttachmentRef],
    max_bytes: u64,
) -> PreparedMessage {
    let results = join_all(
        attachments
            .iter()
            .map(|attachment| prepare_one(fetcher, attachment, max_bytes)),
    )
    .await;

    let (parts, outcomes): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    PreparedMessage {
        content: assemble(text, parts),
        outcomes,
    }
}

async fn prepare_one(
    fetcher: &dyn AttachmentFetcher,
    attachment: &AttachmentRef,
    max_bytes: u64,
) -> (AttachmentPart, AttachmentOutcome) {
    let meta = attachment.meta();
    let name = meta.name.clone();

    let kind = match classify_with_limit(&meta, max_bytes) {
        Classification::Rejected(reason) => {
            return (
                rejected_note(&name, reason),
                AttachmentOutcome::Rejected { name, reason },
            );
        }
        Classification::Accepted(kind) => kind,
    };

    if kind == AttachmentKind::Unsupported {
        return (
            unsupported_note(&name),
            AttachmentOutcome::Included { name, kind },
        );
    }

    match fetcher.fetch(&attachment.url, max_bytes).await {
        Ok(bytes) => (
            build_part(kind, &meta, &bytes),
            AttachmentOutcome::Included { name, kind },
        ),
        Err(FetchError::TooLarge { .. }) => (
            rejected_note(&name, RejectReason::TooLarge),
            AttachmentOutcome::Rejected {
                name,
                reason: RejectReason::TooLarge,
            },
        ),
        Err(e) => {
            warn!(attachment = %name, error = %e, "Failed to download attachment");
            (
                AttachmentPart::Note(format!("[Attachment {name} could not be downloaded]")),
                AttachmentOutcome::Failed {
                    name,
                    error: e.to_string(),
                },
            )
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticFetcher;
    use super::*;
    use crate::llm::ContentPart;

    fn attachment(url: &str, name: &str, mime: Option<&str>, size: Option<u64>) -> AttachmentRef {
        AttachmentRef {
            url: url.to_string(),
            name: name.to_string(),
            mime_type: mime.map(str::to_string),
            size,
        }
    }

    #[tokio::test]
    async fn mixes_inlined_files_and_media() {
        let fetcher = StaticFetcher::default()
            .with("u/cat.png", b"png")
            .with("u/notes.txt", b"remember milk");

        let prepared = prepare_message(
            &fetcher,
            "see attached",
            &[
                attachment("u/cat.png", "cat.png", Some("image/png"), Some(3)),
                attachment("u/notes.txt", "notes.txt", None, Some(13)),
                attachment("u/x.zip", "x.zip", None, Some(10)),
            ],
            MAX_ATTACHMENT_SIZE,
        )
        .await;

        let MessageContent::Parts(parts) = prepared.content else {
            panic!("expected parts");
        };
        assert_eq!(
            parts[0],
            ContentPart::Text {
                text: "see attached\n\n[File: notes.txt]\nremember milk\n\n\
                       [Attachment x.zip omitted: unsupported file type]"
                    .to_string()
            }
        );
        assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
        assert_eq!(prepared.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn oversized_and_failed_downloads_degrade() {
        let fetcher = StaticFetcher::default().with("u/undeclared.txt", &[b'a'; 32]);

        let prepared = prepare_message(
            &fetcher,
            "hi",
            &[
                attachment("u/big.png", "big.png", None, Some(MAX_ATTACHMENT_SIZE + 1)),
                attachment("u/undeclared.txt", "undeclared.txt", None, None),
                attachment("u/missing.txt", "missing.txt", None, Some(1)),
            ],
            16,
        )
        .await;

        // big.png is over the 16 byte limit used in this test, too.
        assert_eq!(
            prepared.outcomes[0],
            AttachmentOutcome::Rejected {
                name: "big.png".to_string(),
                reason: RejectReason::TooLarge
            }
        );
        assert_eq!(
            prepared.outcomes[1],
            AttachmentOutcome::Rejected {
                name: "undeclared.txt".to_string(),
                reason: RejectReason::TooLarge
            }
        );
        assert!(matches!(
            prepared.outcomes[2],
            AttachmentOutcome::Failed { .. }
        ));

        let MessageContent::Text(text) = prepared.content else {
            panic!("expected plain text");
        };
        assert!(text.starts_with("hi\n\n[Attachment big.png skipped: too_large]"));
        assert!(text.contains("[Attachment undeclared.txt skipped: too_large]"));
        assert!(text.ends_with("[Attachment missing.txt could not be downloaded]"));
    }

    #[tokio::test]
    async fn no_attachments_is_plain_text() {
        let prepared = prepare_message(&StaticFetcher::default(), "hello", &[], 10).await;
        assert_eq!(prepared.content, MessageContent::Text("hello".to_string()));
        assert!(prepared.outcomes.is_empty());
    }
}
