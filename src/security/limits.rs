//! Admission limits.
//!
//! # Responsibilities
//! - Cap concurrently admitted requests
//! - Decide early body-size rejection from `Content-Length`
//!
//! # Design Decisions
//! - Admission is a CAS loop so the counter never exceeds the cap, even briefly
//! - Each admitted request holds a [`ConnectionSlot`] that releases on drop,
//!   so handler panics and cancelled futures cannot leak capacity

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap};

/// Bounded counter of in-flight requests.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    active: Arc<AtomicUsize>,
    max: usize,
}

impl ConnectionLimiter {
    /// `max == 0` admits everything.
    pub fn new(max: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Reserve a slot, or `None` when the limit is reached.
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        if self.max == 0 {
            self.active.fetch_add(1, Ordering::AcqRel);
            return Some(ConnectionSlot {
                active: Arc::clone(&self.active),
            });
        }

        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConnectionSlot {
                        active: Arc::clone(&self.active),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One admitted request. Releases its slot when dropped.
#[derive(Debug)]
pub struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Declared body length, if the header is present and well-formed.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn admits_up_to_max() {
        let limiter = ConnectionLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.active(), 2);

        drop(a);
        assert_eq!(limiter.active(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn zero_is_unlimited() {
        let limiter = ConnectionLimiter::new(0);
        let slots: Vec<_> = (0..100).filter_map(|_| limiter.try_acquire()).collect();
        assert_eq!(slots.len(), 100);
        drop(slots);
        assert_eq!(limiter.active(), 0);
    }

    #[test]
    fn concurrent_acquire_never_exceeds_max() {
        let limiter = ConnectionLimiter::new(8);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        if let Some(slot) = limiter.try_acquire() {
                            assert!(limiter.active() <= 8);
                            drop(slot);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(limiter.active(), 0);
    }

    #[test]
    fn parses_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert_eq!(content_length(&headers), Some(42));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("nope"));
        assert_eq!(content_length(&headers), None);
    }
}
