use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One piece of a chat message as delivered by the feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    Text {
        text: String,
    },
    Emote {
        text: String,
        id: Option<String>,
        emote_set_id: Option<String>,
    },
    Cheermote {
        text: String,
        prefix: Option<String>,
        bits: u64,
        tier: u64,
    },
    Mention {
        text: String,
        user_id: Option<String>,
        user_login: Option<String>,
        user_name: Option<String>,
    },
}

impl Fragment {
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text }
            | Self::Emote { text, .. }
            | Self::Cheermote { text, .. }
            | Self::Mention { text, .. } => text,
        }
    }

    /// Whether the fragment survives into terminal output. Emotes and
    /// cheermotes have no text-mode rendering.
    pub fn is_printable(&self) -> bool {
        match self {
            Self::Text { .. } | Self::Mention { .. } => true,
            Self::Emote { .. } | Self::Cheermote { .. } => false,
        }
    }

    /// Decode a fragment from loosely-shaped JSON. Unknown kinds keep their
    /// text and decode as [`Fragment::Text`].
    pub fn from_value(value: &Value) -> Self {
        let text = str_field(value, "text").unwrap_or_default();
        match str_field(value, "type").as_deref() {
            Some("emote") => {
                let emote = value.get("emote");
                Self::Emote {
                    text,
                    id: emote.and_then(|e| str_field(e, "id")),
                    emote_set_id: emote.and_then(|e| str_field(e, "emote_set_id")),
                }
            }
            Some("cheermote") => {
                let cheer = value.get("cheermote");
                Self::Cheermote {
                    text,
                    prefix: cheer.and_then(|c| str_field(c, "prefix")),
                    bits: cheer.and_then(|c| u64_field(c, "bits")).unwrap_or(0),
                    tier: cheer.and_then(|c| u64_field(c, "tier")).unwrap_or(0),
                }
            }
            Some("mention") => {
                let mention = value.get("mention");
                Self::Mention {
                    text,
                    user_id: mention.and_then(|m| str_field(m, "user_id")),
                    user_login: mention.and_then(|m| str_field(m, "user_login")),
                    user_name: mention.and_then(|m| str_field(m, "user_name")),
                }
            }
            _ => Self::Text { text },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub set_id: String,
    pub id: String,
    pub info: String,
}

/// The message a chat line replies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub parent_message_id: String,
    pub parent_user_id: String,
    pub parent_user_login: String,
    pub parent_user_name: String,
    pub parent_message_body: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Broadcaster,
    Moderator,
    Vip,
    Subscriber,
    Regular,
}

/// A chat event received from the upstream channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub broadcaster_user_login: String,
    pub chatter_user_id: String,
    pub chatter_user_login: String,
    pub chatter_user_name: String,
    pub text: String,
    pub fragments: Vec<Fragment>,
    pub color: Option<String>,
    pub badges: Vec<Badge>,
    pub reply: Option<ReplyRef>,
    pub message_type: String,
    pub cheer_bits: Option<u64>,
}

impl ChatMessage {
    /// Decode a chat payload field by field. Missing or mistyped fields fall
    /// back to empty values; this never fails.
    pub fn from_value(value: &Value) -> Self {
        let message = value.get("message");

        let fragments = message
            .and_then(|m| m.get("fragments"))
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Fragment::from_value).collect())
            .unwrap_or_default();

        let badges = value
            .get("badges")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|b| Badge {
                        set_id: str_field(b, "set_id").unwrap_or_default(),
                        id: str_field(b, "id").unwrap_or_default(),
                        info: str_field(b, "info").unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let reply = value
            .get("reply")
            .filter(|r| r.is_object())
            .map(|r| ReplyRef {
                parent_message_id: str_field(r, "parent_message_id").unwrap_or_default(),
                parent_user_id: str_field(r, "parent_user_id").unwrap_or_default(),
                parent_user_login: str_field(r, "parent_user_login").unwrap_or_default(),
                parent_user_name: str_field(r, "parent_user_name").unwrap_or_default(),
                parent_message_body: str_field(r, "parent_message_body").unwrap_or_default(),
            });

        Self {
            message_id: str_field(value, "message_id").unwrap_or_default(),
            broadcaster_user_login: str_field(value, "broadcaster_user_login").unwrap_or_default(),
            chatter_user_id: str_field(value, "chatter_user_id").unwrap_or_default(),
            chatter_user_login: str_field(value, "chatter_user_login").unwrap_or_default(),
            chatter_user_name: str_field(value, "chatter_user_name").unwrap_or_default(),
            text: message.and_then(|m| str_field(m, "text")).unwrap_or_default(),
            fragments,
            color: str_field(value, "color").filter(|c| !c.is_empty()),
            badges,
            reply,
            message_type: str_field(value, "message_type").unwrap_or_default(),
            cheer_bits: value.get("cheer").and_then(|c| u64_field(c, "bits")),
        }
    }

    pub fn has_badge(&self, set_id: &str) -> bool {
        self.badges.iter().any(|b| b.set_id == set_id)
    }

    pub fn is_broadcaster(&self) -> bool {
        self.has_badge("broadcaster")
    }

    pub fn is_moderator(&self) -> bool {
        self.has_badge("moderator")
    }

    pub fn is_vip(&self) -> bool {
        self.has_badge("vip")
    }

    pub fn is_subscriber(&self) -> bool {
        self.has_badge("subscriber")
    }

    /// Highest-ranking role carried by the chatter's badges.
    pub fn role(&self) -> UserRole {
        if self.is_broadcaster() {
            UserRole::Broadcaster
        } else if self.is_moderator() {
            UserRole::Moderator
        } else if self.is_vip() {
            UserRole::Vip
        } else if self.is_subscriber() {
            UserRole::Subscriber
        } else {
            UserRole::Regular
        }
    }

    /// Message text without emotes. Falls back to the raw text when the
    /// payload carried no fragments.
    pub fn printable_text(&self) -> String {
        if self.fragments.is_empty() {
            return self.text.clone();
        }
        self.fragments
            .iter()
            .filter(|f| f.is_printable())
            .map(Fragment::text)
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Display name of the user being replied to, if any.
    pub fn reply_to_user(&self) -> Option<&str> {
        self.reply
            .as_ref()
            .map(|r| r.parent_user_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u64_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}
