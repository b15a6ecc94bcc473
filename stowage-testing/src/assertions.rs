// Test assertions for cached responses

use crate::TestResponse;
use http::StatusCode;

/// Assert that a response has a specific status code
pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    let actual = response.status();
    assert_eq!(
        actual, expected,
        "Expected status {}, got {}",
        expected, actual
    );
}

/// Assert that a response was replayed from cache
pub fn assert_cache_hit(response: &TestResponse) {
    let actual = response.x_cache();
    assert_eq!(
        actual,
        Some("HIT"),
        "Expected x-cache HIT, got {:?}",
        actual
    );
}

/// Assert that a response was produced by the application
pub fn assert_cache_miss(response: &TestResponse) {
    let actual = response.x_cache();
    assert_eq!(
        actual,
        Some("MISS"),
        "Expected x-cache MISS, got {:?}",
        actual
    );
}

/// Assert that a response body equals a string
pub fn assert_body(response: &TestResponse, expected: &str) {
    let actual = response.text();
    assert_eq!(
        actual, expected,
        "Expected body '{}', got '{}'",
        expected, actual
    );
}

/// Assert that a response has a specific header
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    let actual = response.header(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}
