//! Transport-neutral view of the chat platform.

use crate::bot::callbacks::CallbackAction;
use crate::error::TransportError;
use crate::state::ConversationId;
use async_trait::async_trait;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            data: action.to_string(),
        }
    }
}

/// Outgoing message text with an optional inline keyboard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.keyboard.push(buttons);
        self
    }

    pub fn button(self, label: impl Into<String>, action: CallbackAction) -> Self {
        self.row(vec![Button::new(label, action)])
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::text(text)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::text(text)
    }
}

/// Identifier of a sent message, for later edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRef(pub i32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Document,
}

/// An inbound photo or document, not yet downloaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingFile {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub kind: FileKind,
}

impl IncomingFile {
    pub fn is_pdf(&self) -> bool {
        self.mime_type.as_deref() == Some("application/pdf")
            || self.has_extension(&["pdf"])
    }

    pub fn is_image(&self) -> bool {
        self.kind == FileKind::Photo
            || self
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("image/"))
    }

    pub fn is_spreadsheet(&self) -> bool {
        self.has_extension(&["xlsx", "xls"])
    }

    fn has_extension(&self, extensions: &[&str]) -> bool {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .is_some_and(|(_, ext)| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
    }

    pub fn display_name(&self) -> String {
        match (&self.file_name, self.kind) {
            (Some(name), _) => name.clone(),
            (None, FileKind::Photo) => "foto.jpg".to_string(),
            (None, FileKind::Document) => "documento".to_string(),
        }
    }

    /// Short tag from the tail of the file id. Two uploads with the same
    /// name in the same second still get distinct storage keys.
    pub fn storage_tag(&self) -> String {
        let tag: String = self
            .file_id
            .chars()
            .rev()
            .filter(char::is_ascii_alphanumeric)
            .take(12)
            .collect();
        tag.chars().rev().collect()
    }

    pub fn content_type(&self) -> String {
        match (&self.mime_type, self.kind) {
            (Some(mime), _) => mime.clone(),
            (None, FileKind::Photo) => "image/jpeg".to_string(),
            (None, FileKind::Document) => "application/octet-stream".to_string(),
        }
    }
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: &ConversationId, reply: Reply) -> Result<MessageRef, TransportError>;

    async fn edit(
        &self,
        to: &ConversationId,
        message: MessageRef,
        reply: Reply,
    ) -> Result<(), TransportError>;

    async fn delete(&self, to: &ConversationId, message: MessageRef) -> Result<(), TransportError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError>;

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, mime: Option<&str>) -> IncomingFile {
        IncomingFile {
            file_id: "f".to_string(),
            file_name: Some(name.to_string()),
            mime_type: mime.map(str::to_string),
            size: None,
            kind: FileKind::Document,
        }
    }

    #[test]
    fn test_file_type_detection() {
        assert!(document("Reporte.XLSX", None).is_spreadsheet());
        assert!(document("poliza.pdf", None).is_pdf());
        assert!(document("scan", Some("application/pdf")).is_pdf());
        assert!(document("scan.png", Some("image/png")).is_image());
        assert!(!document("notas.txt", Some("text/plain")).is_image());
    }

    #[test]
    fn test_photo_defaults() {
        let photo = IncomingFile {
            file_id: "AgACAgEAAxkBAAIC".to_string(),
            file_name: None,
            mime_type: None,
            size: Some(1),
            kind: FileKind::Photo,
        };
        assert_eq!(photo.display_name(), "foto.jpg");
        assert_eq!(photo.storage_tag(), "AgEAAxkBAAIC");
        assert_eq!(photo.content_type(), "image/jpeg");
    }

    #[test]
    fn test_storage_tag_keeps_only_safe_characters() {
        let mut file = document("a.pdf", None);
        file.file_id = "BQACAgE-AAx_kBAAID".to_string();

        assert_eq!(file.storage_tag(), "AgEAAxkBAAID");
    }
}
