use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    AttachmentId,
    "External reference to an attachment owned by the host download pipeline."
);
newtype_string!(
    ConversationId,
    "Identifies the conversation (thread) in which content was seen."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_from_str() {
        let id = AttachmentId::from("att-1");
        assert_eq!(id.as_str(), "att-1");
        assert_eq!(&*id, "att-1");
    }

    #[test]
    fn newtype_from_string() {
        let conv = ConversationId::from("thread-42".to_string());
        assert_eq!(conv.to_string(), "thread-42");
    }

    #[test]
    fn newtype_serde_transparent() {
        let id = AttachmentId::new("att-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"att-7\"");
        let back: AttachmentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
