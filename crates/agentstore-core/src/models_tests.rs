//! Unit tests for domain models.

use super::*;

#[cfg(test)]
mod message_role_tests {
    use super::*;

    #[test]
    fn display_user() {
        assert_eq!(MessageRole::User.to_string(), "user");
    }

    #[test]
    fn display_assistant() {
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn display_system() {
        assert_eq!(MessageRole::System.to_string(), "system");
    }

    #[test]
    fn display_tool() {
        assert_eq!(MessageRole::Tool.to_string(), "tool");
    }

    #[test]
    fn display_other() {
        assert_eq!(MessageRole::Other.to_string(), "other");
    }

    #[test]
    fn from_user_variants() {
        assert_eq!(MessageRole::from("user"), MessageRole::User);
        assert_eq!(MessageRole::from("User"), MessageRole::User);
        assert_eq!(MessageRole::from("USER"), MessageRole::User);
        assert_eq!(MessageRole::from("human"), MessageRole::User);
        assert_eq!(MessageRole::from("Human"), MessageRole::User);
    }

    #[test]
    fn from_assistant_variants() {
        assert_eq!(MessageRole::from("assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::from("Assistant"), MessageRole::Assistant);
        assert_eq!(MessageRole::from("agent"), MessageRole::Assistant);
        assert_eq!(MessageRole::from("ai"), MessageRole::Assistant);
        assert_eq!(MessageRole::from("bot"), MessageRole::Assistant);
    }

    #[test]
    fn from_system() {
        assert_eq!(MessageRole::from("system"), MessageRole::System);
        assert_eq!(MessageRole::from("System"), MessageRole::System);
    }

    #[test]
    fn from_tool_variants() {
        assert_eq!(MessageRole::from("tool"), MessageRole::Tool);
        assert_eq!(MessageRole::from("function"), MessageRole::Tool);
    }

    #[test]
    fn from_unknown_returns_other() {
        assert_eq!(MessageRole::from("unknown"), MessageRole::Other);
        assert_eq!(MessageRole::from("random"), MessageRole::Other);
        assert_eq!(MessageRole::from(""), MessageRole::Other);
    }

    #[test]
    fn serde_roundtrip_all_variants() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Tool,
            MessageRole::Other,
        ] {
            let json = serde_json::to_string(&role).expect("serialize");
            let parsed: MessageRole = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn serde_deserializes_unknown_as_other() {
        let json = r#""unknown_role""#;
        let parsed: MessageRole = serde_json::from_str(json).expect("deserialize");
        assert_eq!(parsed, MessageRole::Other);
    }
}

#[cfg(test)]
mod user_tests {
    use super::*;
    use uuid::Uuid;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password: "secret".to_string(),
            is_subscribed: false,
            subscription: None,
            free_plan_usage: Some(serde_json::json!({"queries": 3})),
            role: "admin".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            payment_status: "inactive".to_string(),
            plan: "free".to_string(),
            notifications: None,
        }
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let json = serde_json::to_value(sample_user()).expect("serialize");
        assert!(json.get("isSubscribed").is_some());
        assert!(json.get("freePlanUsage").is_some());
        assert!(json.get("paymentStatus").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("is_subscribed").is_none());
    }

    #[test]
    fn password_is_never_serialized() {
        let json = serde_json::to_string(&sample_user()).expect("serialize");
        assert!(!json.contains("secret"));
        assert!(!json.contains("password"));
    }

    #[test]
    fn deserializes_without_password() {
        let user = sample_user();
        let json = serde_json::to_string(&user).expect("serialize");
        let parsed: User = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, user.id);
        assert_eq!(parsed.free_plan_usage, user.free_plan_usage);
        assert!(parsed.password.is_empty());
    }
}

#[cfg(test)]
mod new_user_tests {
    use super::*;

    #[test]
    fn new_leaves_defaults_to_storage() {
        let user = NewUser::new("a@x.com", "p");
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.password, "p");
        assert_eq!(user.role, None);
        assert_eq!(user.plan, None);
        assert_eq!(user.payment_status, None);
        assert_eq!(user.is_subscribed, None);
    }

    #[test]
    fn builders_set_fields() {
        let user = NewUser::new("a@x.com", "p")
            .with_role("member")
            .with_plan("pro")
            .with_payment_status("active")
            .subscribed(true);
        assert_eq!(user.role.as_deref(), Some("member"));
        assert_eq!(user.plan.as_deref(), Some("pro"));
        assert_eq!(user.payment_status.as_deref(), Some("active"));
        assert_eq!(user.is_subscribed, Some(true));
    }

    #[test]
    fn deserialize_requires_email_and_password() {
        let missing: Result<NewUser, _> = serde_json::from_str(r#"{"email": "a@x.com"}"#);
        assert!(missing.is_err());

        let parsed: NewUser =
            serde_json::from_str(r#"{"email": "a@x.com", "password": "p", "isSubscribed": true}"#)
                .expect("deserialize");
        assert_eq!(parsed.is_subscribed, Some(true));
    }
}

#[cfg(test)]
mod user_update_tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        assert!(UserUpdate::default().is_empty());
    }

    #[test]
    fn any_field_makes_it_non_empty() {
        let update = UserUpdate {
            plan: Some("pro".to_string()),
            ..UserUpdate::default()
        };
        assert!(!update.is_empty());

        let clearing = UserUpdate {
            notifications: Some(serde_json::Value::Null),
            ..UserUpdate::default()
        };
        assert!(!clearing.is_empty());
    }

    #[test]
    fn explicit_null_blob_deserializes_as_clear() {
        let update: UserUpdate =
            serde_json::from_str(r#"{"subscription": null, "plan": "pro"}"#).unwrap();
        assert_eq!(update.subscription, Some(serde_json::Value::Null));
        assert_eq!(update.free_plan_usage, None);
        assert_eq!(update.notifications, None);
        assert!(!update.is_empty());
    }

    #[test]
    fn absent_blob_leaves_field_untouched() {
        let update: UserUpdate = serde_json::from_str(r#"{"freePlanUsage": {"used": 3}}"#).unwrap();
        assert_eq!(update.subscription, None);
        assert_eq!(update.free_plan_usage, Some(serde_json::json!({"used": 3})));

        let empty: UserUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn clear_survives_serialization() {
        let clearing = UserUpdate {
            notifications: Some(serde_json::Value::Null),
            ..UserUpdate::default()
        };
        let json = serde_json::to_string(&clearing).unwrap();
        let back: UserUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clearing);
    }
}

#[cfg(test)]
mod chat_session_tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn new_session_starts_with_empty_array() {
        let session = NewChatSession::new("s1", Uuid::new_v4());
        assert_eq!(session.history, serde_json::json!([]));
    }

    #[test]
    fn generated_session_ids_are_unique() {
        let user_id = Uuid::new_v4();
        let a = NewChatSession::generated(user_id);
        let b = NewChatSession::generated(user_id);
        assert_ne!(a.session_id, b.session_id);
        assert!(Uuid::parse_str(&a.session_id).is_ok());
    }

    #[test]
    fn entries_of_non_array_history_is_empty() {
        let session = ChatSession {
            id: Uuid::new_v4(),
            session_id: "s1".to_string(),
            user_id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            history: serde_json::json!({}),
        };
        assert!(session.entries().is_empty());
    }

    #[test]
    fn history_entry_value_shape() {
        let entry = HistoryEntry::new(MessageRole::Assistant, "hello");
        assert_eq!(
            entry.to_value(),
            serde_json::json!({"role": "assistant", "content": "hello"})
        );

        let parsed: HistoryEntry = serde_json::from_value(entry.to_value()).expect("parse");
        assert_eq!(parsed, entry);
    }
}
