//! Cancellation token helpers.
//!
//! Tokens form a tree: a child is cancelled when any parent is, cancellation
//! is permanent and only ever flows downward. Every invocation gets a fresh
//! token; tokens are never reused.

use futures::future::select_all;
use tokio_util::sync::CancellationToken;

/// Fresh token, optionally depending on `parent`.
///
/// A child of an already cancelled parent is cancelled immediately.
pub fn child_token(parent: Option<&CancellationToken>) -> CancellationToken {
    match parent {
        Some(parent) => parent.child_token(),
        None => CancellationToken::new(),
    }
}

/// Fresh token cancelled as soon as any of `parents` is.
///
/// With more than one live parent a watcher task is spawned, so this must be
/// called from within a Tokio runtime. The watcher exits when the returned
/// token is cancelled.
pub fn linked_token(parents: &[CancellationToken]) -> CancellationToken {
    match parents {
        [] => CancellationToken::new(),
        [parent] => parent.child_token(),
        _ => {
            let token = CancellationToken::new();
            if parents.iter().any(CancellationToken::is_cancelled) {
                token.cancel();
                return token;
            }

            let watched = parents.to_vec();
            let linked = token.clone();
            tokio::spawn(async move {
                let any_parent = select_all(watched.iter().map(|parent| Box::pin(parent.cancelled())));
                tokio::select! {
                    _ = any_parent => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            });
            token
        }
    }
}
