use futures::{stream::FuturesUnordered, StreamExt};
use std::future::Future;

/// Drives every future to completion and returns the first error observed.
///
/// Futures are never cancelled when one of them fails, so work in other
/// namespaces is still applied. Errors after the first are dropped; callers
/// log them at the failure site.
pub async fn join_first_error<I, F, E>(futures: I) -> Result<(), E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), E>>,
{
    let mut pending = futures.into_iter().collect::<FuturesUnordered<_>>();
    let mut first = None;
    while let Some(result) = pending.next().await {
        if let Err(error) = result {
            first.get_or_insert(error);
        }
    }
    match first {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
