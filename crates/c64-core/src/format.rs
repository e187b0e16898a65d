//! Rendering of chat and status events into PETSCII byte strings.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::chat::ChatMessage;
use crate::petscii::{self, clean_message, MAX_MESSAGE_LEN};

/// Turns feed events into ready-to-transmit terminal bytes.
pub trait Formatter: Send + Sync {
    /// Render a chat line. `None` means the message should not be shown.
    fn chat(&self, message: &ChatMessage) -> Option<Vec<u8>>;

    /// Notice shown when the upstream link goes up or down.
    fn link_status(&self, connected: bool) -> Vec<u8>;

    /// Notice shown when a reconnect attempt is scheduled.
    fn reconnecting(&self) -> Vec<u8>;

    /// Greeting sent to a freshly connected terminal.
    fn welcome(&self) -> Vec<u8>;

    /// Self-erasing status line injected into idle sessions.
    fn idle_notice(&self) -> Vec<u8>;
}

/// Terminal revision printed in the welcome banner. Independent of the
/// deployed `APP_VERSION`, which only the status API reports.
pub const TERMINAL_REVISION: &str = "0001";

/// Formatter for the Commodore 64 screen editor.
#[derive(Clone, Debug)]
pub struct PetsciiFormatter {
    version: String,
    timezone: Tz,
}

impl Default for PetsciiFormatter {
    fn default() -> Self {
        Self::new(TERMINAL_REVISION)
    }
}

impl PetsciiFormatter {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            timezone: chrono_tz::America::Los_Angeles,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Idle notice for a specific instant.
    pub fn idle_notice_at(&self, now: DateTime<Utc>) -> Vec<u8> {
        let local = now.with_timezone(&self.timezone);
        let stamp = format!("{} (PST)", local.format("%B %-d, %Y at %-I:%M %p"));
        let time = clean_message(&stamp, 36);

        let mut out = Vec::new();
        out.extend_from_slice(&[petscii::CYAN, petscii::REVERSE_ON]);
        out.extend_from_slice(format!("  {time}  ").as_bytes());
        out.extend_from_slice(&[petscii::REVERSE_OFF, petscii::LIGHT_BLUE]);

        out.push(petscii::RETURN);
        out.extend(std::iter::repeat(petscii::CURSOR_LEFT).take(petscii::COLUMNS));
        out.extend_from_slice(&[petscii::GREY, petscii::REVERSE_ON]);
        out.extend_from_slice(format!("  {time}  ").as_bytes());
        out.extend_from_slice(&[petscii::REVERSE_OFF, petscii::LIGHT_BLUE]);

        out.extend(petscii::erase_line());
        out
    }
}

impl Formatter for PetsciiFormatter {
    fn chat(&self, message: &ChatMessage) -> Option<Vec<u8>> {
        let mut text = clean_message(&message.printable_text(), MAX_MESSAGE_LEN);
        if text.is_empty() {
            return None;
        }

        let mut body = Vec::with_capacity(text.len() + 32);
        if let Some(target) = message.reply_to_user() {
            let mention = format!("@{}", target.to_lowercase());
            // First occurrence only.
            if let Some(pos) = text.find(&mention) {
                let rest = text.split_off(pos);
                body.extend_from_slice(text.as_bytes());
                body.extend_from_slice(&[petscii::REVERSE_ON, petscii::WHITE]);
                body.extend_from_slice(mention.as_bytes());
                body.extend_from_slice(&[petscii::LIGHT_BLUE, petscii::REVERSE_OFF]);
                body.extend_from_slice(rest[mention.len()..].as_bytes());
            } else {
                body.extend_from_slice(text.as_bytes());
            }
        } else {
            body.extend_from_slice(text.as_bytes());
        }

        let mut user_color = petscii::WHITE;
        let mut reverse = message.is_subscriber();
        if message.is_moderator() {
            reverse = true;
            user_color = petscii::GREEN;
        }
        if message.is_broadcaster() {
            user_color = petscii::PINK;
            reverse = false;
        }

        let mut out = Vec::with_capacity(body.len() + message.chatter_user_login.len() + 8);
        if reverse {
            out.push(petscii::REVERSE_ON);
        }
        out.push(user_color);
        out.extend_from_slice(message.chatter_user_login.to_lowercase().as_bytes());
        out.push(petscii::REVERSE_OFF);
        out.extend_from_slice(b": ");
        out.push(petscii::LIGHT_BLUE);
        out.extend(body);
        out.extend_from_slice(&[petscii::RETURN, petscii::RETURN]);
        Some(out)
    }

    fn link_status(&self, connected: bool) -> Vec<u8> {
        let (color, label) = if connected {
            (petscii::GREEN, " cyberspace link restored ")
        } else {
            (petscii::RED, " twitch link lost ")
        };
        notice(color, label)
    }

    fn reconnecting(&self) -> Vec<u8> {
        notice(petscii::YELLOW, " reconnecting to twitch... ")
    }

    fn welcome(&self) -> Vec<u8> {
        let mut out = vec![petscii::CLEAR];
        out.extend_from_slice(b"\r\r\r\r");
        out.push(petscii::LIGHT_GREY);
        out.extend_from_slice(b"*** ");
        out.push(petscii::WHITE);
        out.extend_from_slice(b"welcome to the ");
        out.push(petscii::PINK);
        out.extend_from_slice(b"neon ");
        out.push(petscii::CYAN);
        out.extend_from_slice(b"void ");
        out.push(petscii::LIGHT_GREY);
        out.extend_from_slice(b"***\r\r");

        out.extend(petscii::draw_underscore(
            &format!("commodore 64 terminal rev:{}", self.version),
            petscii::LIGHT_BLUE,
            petscii::LIGHT_GREY,
        ));

        out.push(petscii::GREEN);
        out.extend_from_slice(b"all systems are operational\r");

        // The link line prints "down", pauses on padding, then backs up and
        // overwrites it with "up".
        out.push(petscii::LIGHT_GREEN);
        out.extend_from_slice(b"cyberspace link is ");
        out.extend_from_slice(&[petscii::RED, petscii::REVERSE_ON]);
        out.extend_from_slice(b"down");
        out.push(petscii::REVERSE_OFF);
        out.extend_from_slice(b"        ");
        out.extend(std::iter::repeat(petscii::DELETE).take(8 + 4));
        out.extend_from_slice(&[petscii::GREEN, petscii::REVERSE_ON]);
        out.extend_from_slice(b"up");
        out.push(petscii::REVERSE_OFF);
        out.extend_from_slice(b"\r\r\r");

        out.push(petscii::CYAN);
        out.extend_from_slice(b"ready.\r");
        out
    }

    fn idle_notice(&self) -> Vec<u8> {
        self.idle_notice_at(Utc::now())
    }
}

fn notice(color: u8, label: &str) -> Vec<u8> {
    let mut out = vec![petscii::RETURN, color, petscii::REVERSE_ON];
    out.extend_from_slice(label.as_bytes());
    out.push(petscii::REVERSE_OFF);
    out.extend_from_slice(b"\r\r");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Badge;
    use chrono::TimeZone;

    fn message(login: &str, text: &str, badges: &[&str]) -> ChatMessage {
        ChatMessage {
            chatter_user_login: login.into(),
            chatter_user_name: login.into(),
            text: text.into(),
            badges: badges
                .iter()
                .map(|b| Badge { set_id: (*b).into(), ..Default::default() })
                .collect(),
            ..Default::default()
        }
    }

    fn formatter() -> PetsciiFormatter {
        PetsciiFormatter::new("0001")
    }

    #[test]
    fn regular_user_line() {
        let out = formatter().chat(&message("RetroFan", "Hello There", &[])).unwrap();
        let mut expected = vec![petscii::WHITE];
        expected.extend_from_slice(b"retrofan");
        expected.push(petscii::REVERSE_OFF);
        expected.extend_from_slice(b": ");
        expected.push(petscii::LIGHT_BLUE);
        expected.extend_from_slice(b"hello there\r\r");
        assert_eq!(out, expected);
    }

    #[test]
    fn subscriber_is_reversed() {
        let out = formatter().chat(&message("sub", "hi", &["subscriber"])).unwrap();
        assert_eq!(&out[..2], &[petscii::REVERSE_ON, petscii::WHITE]);
    }

    #[test]
    fn moderator_is_green_and_reversed() {
        let out = formatter().chat(&message("mod", "hi", &["moderator"])).unwrap();
        assert_eq!(&out[..2], &[petscii::REVERSE_ON, petscii::GREEN]);
    }

    #[test]
    fn broadcaster_is_pink_without_reverse() {
        let out = formatter()
            .chat(&message("host", "hi", &["broadcaster", "subscriber"]))
            .unwrap();
        assert_eq!(out[0], petscii::PINK);
        assert!(!out[..1].contains(&petscii::REVERSE_ON));
    }

    #[test]
    fn empty_message_is_suppressed() {
        assert!(formatter().chat(&message("x", "🎉🎉", &[])).is_none());
        assert!(formatter().chat(&message("x", "   ", &[])).is_none());
    }

    #[test]
    fn reply_mention_is_highlighted() {
        let mut msg = message("a", "@Bob thanks", &[]);
        msg.reply = Some(crate::chat::ReplyRef {
            parent_user_name: "Bob".into(),
            ..Default::default()
        });
        let out = formatter().chat(&msg).unwrap();

        let mut highlighted = vec![petscii::REVERSE_ON, petscii::WHITE];
        highlighted.extend_from_slice(b"@bob");
        highlighted.extend_from_slice(&[petscii::LIGHT_BLUE, petscii::REVERSE_OFF]);
        highlighted.extend_from_slice(b" thanks\r\r");
        assert!(out.ends_with(&highlighted));
    }

    #[test]
    fn status_notices() {
        let f = formatter();
        let up = f.link_status(true);
        assert_eq!(up[1], petscii::GREEN);
        assert!(String::from_utf8_lossy(&up).contains("cyberspace link restored"));

        let down = f.link_status(false);
        assert_eq!(down[1], petscii::RED);
        assert!(String::from_utf8_lossy(&down).contains("twitch link lost"));

        let retry = f.reconnecting();
        assert_eq!(retry[1], petscii::YELLOW);
    }

    #[test]
    fn welcome_starts_with_clear_and_carries_version() {
        let out = formatter().welcome();
        assert_eq!(out[0], petscii::CLEAR);
        assert!(String::from_utf8_lossy(&out).contains("commodore 64 terminal rev:0001"));
        assert!(out.ends_with(b"ready.\r"));
    }

    #[test]
    fn default_banner_uses_terminal_revision() {
        let out = PetsciiFormatter::default().welcome();
        assert!(String::from_utf8_lossy(&out).contains("rev:0001"));
        assert!(!String::from_utf8_lossy(&out).contains("rev:0000"));
    }

    #[test]
    fn idle_notice_renders_local_time_and_erases_itself() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 22, 4, 0).unwrap();
        let out = formatter().idle_notice_at(now);
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("october 16, 2026 at 3:04 pm (pst)"), "{text}");
        assert!(out.ends_with(&petscii::erase_line()));
    }
}
