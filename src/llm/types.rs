//! Messages exchanged with the model.

use serde::{Deserialize, Serialize};

/// Speaker of a message. Serialized lowercase, as providers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Generation prompt: rules, schema and enrichment.
    System,
    User,
    Assistant,
}

/// One message of a completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_form() {
        assert_eq!(
            serde_json::to_value(Message::assistant("<sql>SELECT 1</sql>")).unwrap(),
            json!({"role": "assistant", "content": "<sql>SELECT 1</sql>"})
        );
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"role":"tool","content":"x"}"#).is_err());
    }
}
