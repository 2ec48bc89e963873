use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct User {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) password_hash: String,
}

impl User {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MIN: usize = 8;

/// Validates registration input.
///
/// # Errors
/// Returns a human-readable reason when the username or password is rejected.
pub fn validate_credentials(username: &str, password: &str) -> Result<(), String> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(format!("Username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err("Username may only contain letters, digits, '_' and '.'".to_string());
    }
    if password.chars().count() < PASSWORD_MIN {
        return Err(format!("Password must be at least {PASSWORD_MIN} characters"));
    }
    Ok(())
}
