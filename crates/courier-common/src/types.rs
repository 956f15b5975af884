use serde::{Deserialize, Serialize};

/// Delivery channel a notification is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Email,
    Telegram,
    Sms,
    Whatsapp,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Email,
        Channel::Telegram,
        Channel::Sms,
        Channel::Whatsapp,
    ];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "EMAIL"),
            Channel::Telegram => write!(f, "TELEGRAM"),
            Channel::Sms => write!(f, "SMS"),
            Channel::Whatsapp => write!(f, "WHATSAPP"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(Channel::Email),
            "TELEGRAM" => Ok(Channel::Telegram),
            "SMS" => Ok(Channel::Sms),
            "WHATSAPP" => Ok(Channel::Whatsapp),
            _ => Err(format!("unknown channel: {s}")),
        }
    }
}

/// Lifecycle state of a persisted notification.
///
/// Transitions are driven exclusively by the dispatcher and the retry
/// scheduler; `SENT`, `DELIVERED`, `FAILED` and `EXPIRED` are terminal
/// except for the explicit force-retry reset on `FAILED` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Expired,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent
                | NotificationStatus::Delivered
                | NotificationStatus::Failed
                | NotificationStatus::Expired
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "PENDING"),
            NotificationStatus::Sending => write!(f, "SENDING"),
            NotificationStatus::Sent => write!(f, "SENT"),
            NotificationStatus::Delivered => write!(f, "DELIVERED"),
            NotificationStatus::Failed => write!(f, "FAILED"),
            NotificationStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(NotificationStatus::Pending),
            "SENDING" => Ok(NotificationStatus::Sending),
            "SENT" => Ok(NotificationStatus::Sent),
            "DELIVERED" => Ok(NotificationStatus::Delivered),
            "FAILED" => Ok(NotificationStatus::Failed),
            "EXPIRED" => Ok(NotificationStatus::Expired),
            _ => Err(format!("unknown status: {s}")),
        }
    }
}

/// Scheduling priority. Influences the order in which due retries are
/// leased (`priority DESC, next_retry_at ASC`); stored as an integer rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn rank(&self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }

    pub fn from_rank(rank: i32) -> Priority {
        match rank {
            2 => Priority::High,
            0 => Priority::Low,
            _ => Priority::Normal,
        }
    }

    /// Parse a request string, falling back to `Normal` for absent or
    /// unrecognized values.
    pub fn parse_or_default(s: Option<&str>) -> Priority {
        match s {
            Some(v) => v.parse().unwrap_or(Priority::Normal),
            None => Priority::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HIGH" => Ok(Priority::High),
            "NORMAL" => Ok(Priority::Normal),
            "LOW" => Ok(Priority::Low),
            _ => Err(format!("unknown priority: {s}")),
        }
    }
}

/// Channel health as recorded on the channel config row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
            HealthStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HEALTHY" => Ok(HealthStatus::Healthy),
            "UNHEALTHY" => Ok(HealthStatus::Unhealthy),
            "UNKNOWN" => Ok(HealthStatus::Unknown),
            _ => Err(format!("unknown health status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_roundtrip() {
        for ch in Channel::ALL {
            assert_eq!(ch.to_string().parse::<Channel>().unwrap(), ch);
        }
        assert!("PIGEON".parse::<Channel>().is_err());
        assert_eq!("email".parse::<Channel>().unwrap(), Channel::Email);
    }

    #[test]
    fn priority_rank_ordering() {
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
        assert_eq!(Priority::from_rank(Priority::High.rank()), Priority::High);
    }

    #[test]
    fn priority_falls_back_to_normal() {
        assert_eq!(Priority::parse_or_default(None), Priority::Normal);
        assert_eq!(Priority::parse_or_default(Some("urgent")), Priority::Normal);
        assert_eq!(Priority::parse_or_default(Some("high")), Priority::High);
    }

    #[test]
    fn terminal_statuses() {
        assert!(NotificationStatus::Sent.is_terminal());
        assert!(NotificationStatus::Expired.is_terminal());
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(!NotificationStatus::Sending.is_terminal());
    }
}
