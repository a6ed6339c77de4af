use serde::{Deserialize, Serialize};

/// One row of the remote board, as rendered upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "number")]
    pub sequence_number: String,
    #[serde(rename = "name")]
    pub author_name: String,
    #[serde(rename = "name_color")]
    pub author_name_color: Option<String>,
    /// `@` followed by 7 alphanumerics.
    #[serde(rename = "user_id")]
    pub author_id: Option<String>,
    #[serde(rename = "id_color")]
    pub author_id_color: Option<String>,
    #[serde(rename = "extra_text")]
    pub decoration_text: Option<String>,
    #[serde(rename = "message")]
    pub body: String,
}

pub type Messages = Vec<Message>;

/// Structured result of scraping one fetch of the board.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[derive(Serialize, Deserialize)]
pub struct Board {
    pub topic: Option<String>,
    pub messages: Messages,
}

impl Board {
    /// JSON text with non-ASCII characters left as-is.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
