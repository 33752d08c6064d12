use axum::http::{header, HeaderMap};
use cookie::{Cookie, SameSite};
use time::Duration;

use crate::config::CookieConfig;

const LOGGED_OUT: &str = "loggedout";

/// httpOnly cookie carrying the bearer token for browser clients.
pub fn token_cookie(cfg: &CookieConfig, token: &str, ttl: Duration) -> Cookie<'static> {
    Cookie::build((cfg.name.clone(), token.to_string()))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(ttl)
        .build()
}

/// Overwrites the token cookie with a placeholder that expires almost at once.
pub fn cleared_cookie(cfg: &CookieConfig) -> Cookie<'static> {
    Cookie::build((cfg.name.clone(), LOGGED_OUT))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(10))
        .build()
}

pub fn token_from_cookies(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Bearer token from the Authorization header, falling back to the cookie.
pub fn bearer_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    from_header.or_else(|| token_from_cookies(headers, cookie_name))
}
