// src/retry.rs
//! Attempt-with-fallback combinator shared by the README fetcher (branch
//! fallback) and the model layer (attempt budget).

use std::future::Future;

/// Every candidate failed. `last` is `None` only when there was nothing to try.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: Option<E>,
}

impl<E: std::fmt::Display> std::fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last {
            Some(e) => write!(f, "all {} attempts failed; last error: {e}", self.attempts),
            None => write!(f, "no attempts were made"),
        }
    }
}

/// Run `op` for each candidate in order, stopping at the first `Ok`.
/// Attempts are strictly sequential and there is no delay between them.
pub async fn first_success<I, T, E, F, Fut>(candidates: I, mut op: F) -> Result<T, Exhausted<E>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0u32;
    let mut last = None;
    for candidate in candidates {
        attempts += 1;
        match op(candidate).await {
            Ok(v) => return Ok(v),
            Err(e) => last = Some(e),
        }
    }
    Err(Exhausted { attempts, last })
}
