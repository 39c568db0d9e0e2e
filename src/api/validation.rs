use super::ApiError;

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 32;

pub fn validate_user_id(id: i32) -> Result<i32, ApiError> {
    if id <= 0 {
        return Err(ApiError::validation(format!(
            "Invalid user ID: {}. ID must be a positive integer",
            id
        )));
    }
    Ok(id)
}

pub fn validate_username(username: &str) -> Result<&str, ApiError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ApiError::validation("Username cannot be empty"));
    }

    if trimmed.len() > MAX_USERNAME_LEN {
        return Err(ApiError::validation(format!(
            "Username must be {MAX_USERNAME_LEN} characters or less"
        )));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ApiError::validation(
            "Username can only contain letters, numbers, dots, hyphens, and underscores",
        ));
    }

    Ok(trimmed)
}

pub fn validate_password(password: &str) -> Result<&str, ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(password)
}

/// Empty is allowed; anything else needs a local part and a domain.
pub fn validate_email(email: &str) -> Result<&str, ApiError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Ok(trimmed);
    }

    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(trimmed)
        }
        _ => Err(ApiError::validation(format!("Invalid email address: {trimmed}"))),
    }
}

pub fn validate_limit(limit: usize) -> Result<usize, ApiError> {
    const MAX_LIMIT: usize = 200;
    const MIN_LIMIT: usize = 1;

    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "Invalid limit: {}. Limit must be between {} and {}",
            limit, MIN_LIMIT, MAX_LIMIT
        )));
    }
    Ok(limit)
}

/// Accepts only same-site relative targets for post-login redirects.
#[must_use]
pub fn safe_next(next: &str) -> Option<&str> {
    let next = next.trim();
    let acceptable = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(char::is_control);

    acceptable.then_some(next)
}
