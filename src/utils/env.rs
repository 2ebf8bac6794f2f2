/// Get environment variable with HOSTBUS_ prefix, falling back to unprefixed version
///
/// Checks `HOSTBUS_{key}` first, then `{key}`, so deployments can namespace
/// settings without breaking conventional names like `DATABASE_URL` or `PORT`.
///
/// ```rust,ignore
/// use hostbus::utils::get_env_with_prefix;
///
/// // Checks HOSTBUS_RATE_LIMIT_LOGIN first, then RATE_LIMIT_LOGIN
/// let login_rate = get_env_with_prefix("RATE_LIMIT_LOGIN");
/// # let _ = login_rate;
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("HOSTBUS_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
        .filter(|value| !value.is_empty())
}
