use std::collections::HashSet;

use anyhow::Context;

use crate::{CommentId, Db};

/// Deletes `root` and every reply transitively reachable from it.
///
/// Replies are removed depth-first, post-order, so that a comment is never
/// removed before all of its own replies. Comments that disappear while the
/// walk is running are considered already removed. Once the root is gone, it
/// is unlinked from its parent's replies.
///
/// Returns the comments actually removed by this call, in removal order.
pub async fn delete_thread<D: Db>(db: &mut D, root: CommentId) -> anyhow::Result<Vec<CommentId>> {
    let root_comment = match db
        .comment(root)
        .await
        .with_context(|| format!("fetching thread root {root:?}"))?
    {
        Some(c) => c,
        None => {
            tracing::debug!(?root, "thread root already deleted");
            return Ok(Vec::new());
        }
    };

    let mut removed = Vec::new();
    let mut seen = HashSet::new();
    // (comment, replies already pushed)
    let mut stack = vec![(root, false)];
    seen.insert(root);
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            if db
                .remove_comment(id)
                .await
                .with_context(|| format!("removing comment {id:?}"))?
            {
                removed.push(id);
            } else {
                tracing::debug!(?id, "comment was concurrently deleted");
            }
            continue;
        }
        stack.push((id, true));
        let replies = db
            .list_replies(id)
            .await
            .with_context(|| format!("listing replies of {id:?}"))?;
        for reply in replies.into_iter().rev() {
            // the reply graph is a forest, but do not loop forever on a corrupted index
            if seen.insert(reply) {
                stack.push((reply, false));
            } else {
                tracing::warn!(?reply, parent = ?id, "comment reached twice while deleting thread");
            }
        }
    }

    if let Some(parent) = root_comment.parent_id {
        db.unlink_reply(parent, root)
            .await
            .with_context(|| format!("unlinking {root:?} from its parent {parent:?}"))?;
    }

    Ok(removed)
}
