//! `Set-Cookie` handling.
//!
//! Cookies set by middleware upstream of the cache belong to one visitor
//! and are never stored. Cookies set by the handler are part of the
//! response and replay with it.

use crate::entry::StoredHeaders;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};

/// `Set-Cookie` values currently present on a header map.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Drop every stored `Set-Cookie` value that was set upstream.
pub fn strip_upstream_cookies(headers: &mut StoredHeaders, upstream: &[String]) {
    if upstream.is_empty() {
        return;
    }

    let key = SET_COOKIE.as_str();
    if let Some(cookies) = headers.get_mut(key) {
        cookies.retain(|cookie| !upstream.contains(cookie));
        if cookies.is_empty() {
            headers.remove(key);
        }
    }
}

/// Cached cookies first, then fresh ones not already present.
pub fn merge_cookies(cached: &[String], fresh: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(cached.len() + fresh.len());
    for cookie in cached.iter().chain(fresh) {
        if !merged.contains(cookie) {
            merged.push(cookie.clone());
        }
    }
    merged
}

/// Replace the `Set-Cookie` values on a header map.
pub fn set_set_cookies(headers: &mut HeaderMap, cookies: &[String]) {
    headers.remove(SET_COOKIE);
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
}
