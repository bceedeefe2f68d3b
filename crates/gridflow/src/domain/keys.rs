use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validation::{check_length, ValidationErrors};

const KEY_LENGTH: usize = 48;

/// Account that owns API keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub user_id: u64,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn issue(user_id: u64, input: NewApiKey, now: DateTime<Utc>) -> Result<Self, ValidationErrors> {
        let name = input.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            key: generate_key(),
            user_id,
            is_active: input.is_active.unwrap_or(true),
            expires_at: input.expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Active and not past its expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expiry| expiry > now)
    }

    pub fn apply(
        &mut self,
        update: ApiKeyUpdate,
        partial: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match &update.name {
            Some(name) => check_length(&mut errors, "name", name, 3, 100),
            None if !partial => errors.add("name", "This field is required."),
            None => {}
        }
        errors.into_result()?;

        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
        }
        if let Some(expires_at) = update.expires_at {
            self.expires_at = expires_at;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn view(&self, user: User) -> ApiKeyView {
        ApiKeyView {
            id: self.id,
            name: self.name.clone(),
            key: self.key.clone(),
            user,
            is_active: self.is_active,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApiKey {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewApiKey {
    fn validate(&self) -> Result<String, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        match &self.name {
            Some(name) => check_length(&mut errors, "name", name, 3, 100),
            None => errors.add("name", "This field is required."),
        }
        errors.into_result()?;
        Ok(self.name.as_deref().unwrap_or_default().trim().to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// `Some(None)` clears the expiry.
    #[serde(default, deserialize_with = "super::double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyView {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub user: User,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
