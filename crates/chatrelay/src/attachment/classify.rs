//! Attachment classification and content-part construction.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::llm::{ContentPart, MediaUrl, MessageContent};

/// Largest attachment accepted (20 MiB).
pub const MAX_ATTACHMENT_SIZE: u64 = 20 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
];

const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "log", "json", "jsonl", "yaml", "yml", "toml", "xml",
    "html", "htm", "css", "ini", "cfg", "conf", "env", "rs", "py", "js", "mjs", "ts", "tsx",
    "jsx", "go", "java", "kt", "c", "h", "cpp", "hpp", "cs", "rb", "php", "sh", "bash", "sql",
    "swift", "lua",
];

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/yaml",
    "application/x-yaml",
    "application/toml",
    "application/javascript",
    "application/x-sh",
    "application/sql",
];

/// What the client declared about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub name: String,
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

/// How an accepted attachment is forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Text,
    Unsupported,
}

/// Why an attachment was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooLarge,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::TooLarge => "too_large",
        }
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accepted(AttachmentKind),
    Rejected(RejectReason),
}

/// Classify against the default size ceiling.
pub fn classify(meta: &AttachmentMeta) -> Classification {
    classify_with_limit(meta, MAX_ATTACHMENT_SIZE)
}

/// Classify an attachment. Total: every input maps to exactly one outcome.
pub fn classify_with_limit(meta: &AttachmentMeta, max_bytes: u64) -> Classification {
    if meta.size_bytes > max_bytes {
        return Classification::Rejected(RejectReason::TooLarge);
    }
    Classification::Accepted(kind_of(meta))
}

fn kind_of(meta: &AttachmentMeta) -> AttachmentKind {
    if let Some(mime) = normalized_mime(meta) {
        if mime.starts_with("image/") {
            return AttachmentKind::Image;
        }
        if mime.starts_with("video/") {
            return AttachmentKind::Video;
        }
        if mime.starts_with("text/") || TEXT_MIME_TYPES.contains(&mime.as_str()) {
            return AttachmentKind::Text;
        }
    }

    let Some(ext) = extension(&meta.name) else {
        return AttachmentKind::Unsupported;
    };
    if IMAGE_EXTENSIONS.iter().any(|(e, _)| *e == ext) {
        AttachmentKind::Image
    } else if VIDEO_EXTENSIONS.iter().any(|(e, _)| *e == ext) {
        AttachmentKind::Video
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        AttachmentKind::Text
    } else {
        AttachmentKind::Unsupported
    }
}

fn normalized_mime(meta: &AttachmentMeta) -> Option<String> {
    let mime = meta.mime_type.as_deref()?;
    // Drop parameters such as "; charset=utf-8".
    let essence = mime.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// MIME type to put in a data URL, falling back to the extension table.
fn media_mime(meta: &AttachmentMeta, kind: AttachmentKind) -> String {
    if let Some(mime) = normalized_mime(meta)
        && (mime.starts_with("image/") || mime.starts_with("video/"))
    {
        return mime;
    }
    let table = match kind {
        AttachmentKind::Video => VIDEO_EXTENSIONS,
        _ => IMAGE_EXTENSIONS,
    };
    extension(&meta.name)
        .and_then(|ext| table.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m))
        .unwrap_or(match kind {
            AttachmentKind::Video => "video/mp4",
            _ => "image/png",
        })
        .to_string()
}

/// An attachment ready to be folded into the outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentPart {
    Image(ContentPart),
    Video(ContentPart),
    /// Decoded text, inlined verbatim into the leading text part.
    Text { name: String, text: String },
    /// A placeholder line for a file that carries no payload.
    Note(String),
}

/// Build the part for an accepted attachment from its downloaded bytes.
pub fn build_part(kind: AttachmentKind, meta: &AttachmentMeta, bytes: &[u8]) -> AttachmentPart {
    match kind {
        AttachmentKind::Image => AttachmentPart::Image(ContentPart::ImageUrl {
            image_url: data_url(&media_mime(meta, kind), bytes),
        }),
        AttachmentKind::Video => AttachmentPart::Video(ContentPart::VideoUrl {
            video_url: data_url(&media_mime(meta, kind), bytes),
        }),
        AttachmentKind::Text => AttachmentPart::Text {
            name: meta.name.clone(),
            text: String::from_utf8_lossy(bytes).into_owned(),
        },
        AttachmentKind::Unsupported => unsupported_note(&meta.name),
    }
}

/// Placeholder for a file type the relay cannot forward.
pub fn unsupported_note(name: &str) -> AttachmentPart {
    AttachmentPart::Note(format!("[Attachment {name} omitted: unsupported file type]"))
}

/// Placeholder for a rejected file.
pub fn rejected_note(name: &str, reason: RejectReason) -> AttachmentPart {
    AttachmentPart::Note(format!("[Attachment {name} skipped: {}]", reason.code()))
}

fn data_url(mime: &str, bytes: &[u8]) -> MediaUrl {
    MediaUrl {
        url: format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
    }
}

/// Combine the typed text and attachment parts into message content.
///
/// Order: one leading text part (typed text, inlined files, notes), then
/// images, then videos. Text-only results collapse to a plain string.
pub fn assemble(text: &str, parts: Vec<AttachmentPart>) -> MessageContent {
    let mut leading = text.trim().to_string();
    let mut images = Vec::new();
    let mut videos = Vec::new();

    for part in parts {
        match part {
            AttachmentPart::Image(part) => images.push(part),
            AttachmentPart::Video(part) => videos.push(part),
            AttachmentPart::Text { name, text } => {
                push_block(&mut leading, &format!("[File: {name}]\n{text}"));
            }
            AttachmentPart::Note(note) => push_block(&mut leading, &note),
        }
    }

    if images.is_empty() && videos.is_empty() {
        return MessageContent::Text(leading);
    }

    let mut content = Vec::with_capacity(1 + images.len() + videos.len());
    if !leading.is_empty() {
        content.push(ContentPart::Text { text: leading });
    }
    content.extend(images);
    content.extend(videos);
    MessageContent::Parts(content)
}

fn push_block(target: &mut String, block: &str) {
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(block);
}
