use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Audio,
    File,
}

/// Binary payload attached to a response, base64 encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub content: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

/// What an agent hands back to the outside after handling a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
}

impl Response {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            attachments: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.attachments.is_empty()
    }

    /// Fold another response into this one: texts are joined by a newline,
    /// attachments appended.
    pub fn merge(&mut self, other: Response) {
        if let Some(text) = other.text {
            self.text = Some(match self.text.take() {
                Some(existing) => format!("{}\n{}", existing, text),
                None => text,
            });
        }
        self.attachments.extend(other.attachments);
    }
}
