//! At-most-once retry of the single most recent unsent post.
//!
//! The client only ever tracks the *last* post it tried to send while the
//! connection to the primary was up. On reconnect it resends that one post,
//! once, then forgets it regardless of whether the resend itself succeeds --
//! matching the spec's "no guaranteed delivery across failover" non-goal.

use tokio::sync::Mutex;
use tsn_protocol::Post;

#[derive(Debug, Default)]
pub struct RetrySlot {
    last_unsent: Mutex<Option<Post>>,
}

impl RetrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `post` as the most recent one we attempted to send.
    pub async fn mark_attempted(&self, post: Post) {
        *self.last_unsent.lock().await = Some(post);
    }

    /// Clear the slot once a post is known to have been written successfully.
    pub async fn mark_sent(&self) {
        *self.last_unsent.lock().await = None;
    }

    /// Take the pending post, if any, for a single resend attempt. Always
    /// empties the slot -- callers get at most one retry.
    pub async fn take_for_retry(&self) -> Option<Post> {
        self.last_unsent.lock().await.take()
    }
}
