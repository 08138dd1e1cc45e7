use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification categories. Each category is paired with an eligibility policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Vaccination,
    Weather,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Vaccination, Category::Weather];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vaccination => "vaccination",
            Category::Weather => "weather",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vaccination" => Ok(Category::Vaccination),
            "weather" => Ok(Category::Weather),
            other => Err(format!("unknown notification category '{}'", other)),
        }
    }
}

/// A recipient's display language preference.
///
/// `En` is the default variant every record carries; `Ar` selects the localized
/// variant when one is present. Unknown tags behave as `En`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ar,
}

impl Language {
    /// Lenient parse: anything other than a recognised secondary tag maps to `En`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()) {
            Some(t) if t == "ar" => Language::Ar,
            _ => Language::En,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::En => write!(f, "en"),
            Language::Ar => write!(f, "ar"),
        }
    }
}

/// Delivery state of a notification record, shared by the periodic scan and
/// the on-create path.
///
/// `Sent` is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Sent { at: DateTime<Utc> },
    Failed { reason: String },
}

impl DeliveryState {
    /// Tag as persisted in the `delivery_state` column.
    pub fn tag(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent { .. } => "sent",
            DeliveryState::Failed { .. } => "failed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryState::Sent { .. })
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryState::Sent { at } => Some(*at),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Someone who can receive push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    /// Push-delivery token. `None` means the recipient cannot be notified yet.
    pub push_token: Option<String>,
    pub language: Language,
}

impl Recipient {
    /// The delivery token, if one is registered and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.push_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A scheduled notification owned by a single recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient_id: String,
    pub category: Category,
    pub state: DeliveryState,
    /// When a time-critical notification is due.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// When the record was produced; drives freshness windows.
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
    pub title_ar: Option<String>,
    pub body: Option<String>,
    pub body_ar: Option<String>,
    /// Category-specific side data (e.g. `childId`, `vaccineId`).
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Push message handed to the delivery channel. All data values are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_tag() {
        assert_eq!(Language::from_tag(Some("ar")), Language::Ar);
        assert_eq!(Language::from_tag(Some(" AR ")), Language::Ar);
        assert_eq!(Language::from_tag(Some("en")), Language::En);
        assert_eq!(Language::from_tag(Some("fr")), Language::En);
        assert_eq!(Language::from_tag(None), Language::En);
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let mut recipient = Recipient {
            id: "u1".to_string(),
            push_token: Some("   ".to_string()),
            language: Language::En,
        };
        assert_eq!(recipient.token(), None);

        recipient.push_token = Some("tok".to_string());
        assert_eq!(recipient.token(), Some("tok"));
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("unknown".parse::<Category>().is_err());
    }

    #[test]
    fn test_delivery_state_accessors() {
        let at = Utc::now();
        assert!(DeliveryState::Sent { at }.is_delivered());
        assert_eq!(DeliveryState::Sent { at }.delivered_at(), Some(at));
        assert!(!DeliveryState::Pending.is_delivered());
        assert_eq!(
            DeliveryState::Failed {
                reason: "x".to_string()
            }
            .tag(),
            "failed"
        );
    }
}
