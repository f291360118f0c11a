//! Shared utility functions for the opshub crate.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
///
/// Every mutation under these locks is a single assignment or push, so a
/// poisoned lock never exposes half-applied state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn `fut` on the current tokio runtime. Returns `false`, without
/// running it, when called outside a runtime.
pub(crate) fn spawn_on_current<F>(fut: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(fut);
            true
        }
        Err(_) => false,
    }
}

/// Pull a human-readable message out of an error response body.
///
/// The backend answers failures with `{"message": "..."}`; some middleware
/// uses `{"error": "..."}`. Anything else is returned trimmed, or `None` if
/// the body is empty.
pub fn error_message_from_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "msg"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return Some(msg.to_string());
            }
        }
    }
    Some(trimmed.to_string())
}

/// Replace each run of whitespace with a single `-`.
pub fn dash_whitespace(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_message_field() {
        let body = r#"{"message": "Only admins can delete projects", "error": "Forbidden"}"#;
        assert_eq!(
            error_message_from_body(body),
            Some("Only admins can delete projects".to_string())
        );
    }

    #[test]
    fn test_error_message_falls_back_to_error_field() {
        assert_eq!(
            error_message_from_body(r#"{"error": "Unauthenticated"}"#),
            Some("Unauthenticated".to_string())
        );
    }

    #[test]
    fn test_error_message_plain_text() {
        assert_eq!(
            error_message_from_body("  Bad Gateway \n"),
            Some("Bad Gateway".to_string())
        );
    }

    #[test]
    fn test_error_message_empty_body() {
        assert_eq!(error_message_from_body("   "), None);
    }

    #[test]
    fn test_dash_whitespace_collapses_runs() {
        assert_eq!(dash_whitespace("Q3 report  final.pdf"), "Q3-report-final.pdf");
        assert_eq!(dash_whitespace("tab\tname"), "tab-name");
        assert_eq!(dash_whitespace("plain.png"), "plain.png");
    }

    #[test]
    fn test_spawn_outside_runtime_is_refused() {
        assert!(!spawn_on_current(async {}));
    }

    #[tokio::test]
    async fn test_spawn_inside_runtime_runs() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        assert!(spawn_on_current(async move {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 1);
    }
}
