//! Recipient masking for logs, API responses, and webhook payloads.

use crate::types::Channel;

/// Mask a recipient for safe display.
///
/// Email addresses keep the first two characters of the local part and the
/// full domain (`ab***@example.com`); everything else keeps the first four
/// and last two characters (`+791***21`). Values too short to mask
/// meaningfully collapse to `***`.
pub fn mask_recipient(recipient: &str, channel: Channel) -> String {
    match channel {
        Channel::Email => mask_email(recipient),
        _ => mask_generic(recipient),
    }
}

fn mask_email(email: &str) -> String {
    match email.find('@') {
        Some(at) if at > 2 => format!("{}***{}", &email[..2], &email[at..]),
        Some(at) => format!("***{}", &email[at..]),
        None => mask_generic(email),
    }
}

fn mask_generic(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 6 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email_keeping_domain() {
        assert_eq!(
            mask_recipient("user@example.com", Channel::Email),
            "us***@example.com"
        );
        assert_eq!(mask_recipient("ab@example.com", Channel::Email), "***@example.com");
    }

    #[test]
    fn masks_phone_numbers() {
        assert_eq!(mask_recipient("+79161234567", Channel::Sms), "+791***67");
        assert_eq!(mask_recipient("+7916", Channel::Sms), "***");
    }

    #[test]
    fn masks_chat_ids() {
        assert_eq!(mask_recipient("123456789", Channel::Telegram), "1234***89");
        assert_eq!(mask_recipient("12345", Channel::Telegram), "***");
    }

    #[test]
    fn email_without_at_falls_back_to_generic() {
        assert_eq!(mask_recipient("not-an-email", Channel::Email), "not-***il");
    }
}
