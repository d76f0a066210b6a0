use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;

use crate::error::DepositError;

pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

pub fn is_admin_key(keys: &[String], presented: Option<&str>) -> bool {
    match presented {
        Some(key) if !key.is_empty() => keys.iter().any(|k| k == key),
        _ => false,
    }
}

// Axum middleware function
pub async fn admin_key_layer(
    keys: Arc<Vec<String>>,
    request: Request,
    next: Next,
) -> Result<Response, DepositError> {
    let presented = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    if !is_admin_key(&keys, presented) {
        tracing::warn!("Rejected admin request to {}", request.uri().path());
        return Err(DepositError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configured_keys_pass() {
        let keys = vec!["secret-1".to_string(), "secret-2".to_string()];
        assert!(is_admin_key(&keys, Some("secret-2")));
        assert!(!is_admin_key(&keys, Some("secret-3")));
        assert!(!is_admin_key(&keys, Some("")));
        assert!(!is_admin_key(&keys, None));
        assert!(!is_admin_key(&[], Some("secret-1")));
    }
}
