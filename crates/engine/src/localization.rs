use tidings_common::types::{Language, NotificationRecord};

/// Display strings for a record in the recipient's language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedText {
    pub title: String,
    pub body: String,
}

/// Pick the title and body for `language`.
///
/// The localized variant is used only for `Ar` and only when it is non-empty;
/// title and body fall back to the default variant independently. Missing
/// fields resolve to empty strings.
pub fn resolve(record: &NotificationRecord, language: Language) -> LocalizedText {
    LocalizedText {
        title: pick(language, record.title.as_deref(), record.title_ar.as_deref()),
        body: pick(language, record.body.as_deref(), record.body_ar.as_deref()),
    }
}

fn pick(language: Language, default: Option<&str>, localized: Option<&str>) -> String {
    let localized = match language {
        Language::Ar => localized.filter(|s| !s.is_empty()),
        Language::En => None,
    };
    localized.or(default).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tidings_common::types::{Category, DeliveryState};
    use uuid::Uuid;

    fn record(title_ar: Option<&str>, body_ar: Option<&str>) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: "u1".to_string(),
            category: Category::Vaccination,
            state: DeliveryState::Pending,
            scheduled_time: None,
            created_at: Utc::now(),
            title: Some("Vaccination Reminder".to_string()),
            title_ar: title_ar.map(str::to_string),
            body: Some("Time for MMR".to_string()),
            body_ar: body_ar.map(str::to_string),
            payload: Default::default(),
        }
    }

    #[test]
    fn test_empty_localized_title_falls_back() {
        let text = resolve(&record(Some(""), None), Language::Ar);
        assert_eq!(text.title, "Vaccination Reminder");
    }

    #[test]
    fn test_whitespace_localized_title_is_kept() {
        let text = resolve(&record(Some(" "), None), Language::Ar);
        assert_eq!(text.title, " ");
    }

    #[test]
    fn test_localized_title_used_for_ar() {
        let text = resolve(&record(Some("تذكير بالتطعيم"), None), Language::Ar);
        assert_eq!(text.title, "تذكير بالتطعيم");
    }

    #[test]
    fn test_title_and_body_fall_back_independently() {
        let text = resolve(&record(None, Some("حان وقت اللقاح")), Language::Ar);
        assert_eq!(text.title, "Vaccination Reminder");
        assert_eq!(text.body, "حان وقت اللقاح");
    }

    #[test]
    fn test_default_language_ignores_localized() {
        let text = resolve(&record(Some("تذكير"), Some("نص")), Language::En);
        assert_eq!(text.title, "Vaccination Reminder");
        assert_eq!(text.body, "Time for MMR");
    }

    #[test]
    fn test_missing_fields_degrade_to_empty() {
        let mut r = record(None, None);
        r.title = None;
        r.body = None;
        let text = resolve(&r, Language::Ar);
        assert_eq!(text.title, "");
        assert_eq!(text.body, "");
    }
}
