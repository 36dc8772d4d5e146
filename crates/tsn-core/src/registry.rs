//! In-memory user registry: the primary's live view of who is registered,
//! who follows whom, and each user's bounded recent-post buffer.
//!
//! Users are keyed by username rather than addressed by pointer/index so a
//! `Follow` from one connection and a fan-out from another never race on a
//! moved or freed record -- each user gets one stable `Arc<Mutex<UserState>>`
//! for its lifetime in the process.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tsn_protocol::Post;

use crate::persistence::{PersistenceError, Store};
use crate::username::{Username, UsernameError};

/// Maximum number of buffered posts kept in memory per user, matching the
/// durable replay depth. Oldest entry is evicted on overflow -- this is why
/// the buffer is a hand-rolled `VecDeque` rather than a bounded
/// `tokio::sync::mpsc` channel, whose `try_send` drops the newest item on a
/// full channel instead.
pub const BUFFER_CAP: usize = crate::persistence::TIMELINE_REPLAY_DEPTH;

#[derive(Debug)]
pub enum CoreError {
    InvalidUsername(UsernameError),
    AlreadyFollowing,
    NotFollowing,
    UnknownUser,
    /// `Login` for a user that is already connected -- the original reports
    /// this with the same "Invalid Username" text as a malformed username.
    AlreadyConnected,
    /// `Follow`/`Unfollow` where the target is the caller themselves.
    SelfTarget,
    Persistence(PersistenceError),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidUsername(e) => write!(f, "invalid username: {e}"),
            CoreError::AlreadyFollowing => write!(f, "already following user"),
            CoreError::NotFollowing => write!(f, "not following user"),
            CoreError::UnknownUser => write!(f, "unknown user"),
            CoreError::AlreadyConnected => write!(f, "user already connected"),
            CoreError::SelfTarget => write!(f, "cannot follow or unfollow yourself"),
            CoreError::Persistence(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<PersistenceError> for CoreError {
    fn from(e: PersistenceError) -> Self {
        CoreError::Persistence(e)
    }
}

impl From<UsernameError> for CoreError {
    fn from(e: UsernameError) -> Self {
        CoreError::InvalidUsername(e)
    }
}

/// Whether a `Login` found an existing user or created a new one -- the two
/// cases get different reply text (`Welcome Back` vs `Login Successful!`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Existing,
    New,
}

/// The bounded, append-then-evict in-memory view of a user's recent inbound
/// timeline, paired with a `Notify` so an attached streamer wakes on each
/// push instead of polling.
#[derive(Debug, Default)]
struct TimelineBuffer {
    entries: VecDeque<Post>,
}

impl TimelineBuffer {
    fn push(&mut self, post: Post) {
        if self.entries.len() == BUFFER_CAP {
            self.entries.pop_front();
        }
        self.entries.push_back(post);
    }
}

#[derive(Debug)]
pub struct UserState {
    pub username: String,
    /// Usernames this user follows. Seeded with the user's own username on
    /// creation, so a user's own posts mirror into their own inbound log.
    following: HashSet<String>,
    /// Usernames that follow this user, i.e. who to fan a post out to.
    followers: HashSet<String>,
    /// Whether this user currently has a live `Login` session. A second
    /// `Login` while already connected is rejected rather than re-greeted.
    connected: bool,
    buffer: TimelineBuffer,
    notify: Arc<Notify>,
}

impl UserState {
    fn new(username: String) -> Self {
        UserState {
            username,
            following: HashSet::new(),
            followers: HashSet::new(),
            connected: false,
            buffer: TimelineBuffer::default(),
            notify: Arc::new(Notify::new()),
        }
    }
}

pub type UserHandle = Arc<Mutex<UserState>>;

/// The primary's live registry of all known users, backed by `Store` for
/// durability. Safe to share across connection-handler tasks via `Arc`.
#[derive(Debug)]
pub struct Registry {
    users: RwLock<std::collections::HashMap<String, UserHandle>>,
    store: Store,
}

impl Registry {
    /// Build a registry from whatever is already on disk under `store`,
    /// reconstructing every user's in-memory follow graph so a restarted or
    /// newly-promoted primary doesn't lose it. `followers` isn't itself
    /// persisted -- it's the inverse of every user's persisted `following`
    /// list, so it's rebuilt by loading each user's list and fanning it out
    /// to the followee's in-memory `followers` set.
    pub fn load(store: Store) -> Result<Self, CoreError> {
        let usernames = store.load_all_users()?;
        let mut states: std::collections::HashMap<String, UserState> = std::collections::HashMap::new();
        for username in &usernames {
            let following = store.load_following(username)?;
            let mut state = UserState::new(username.clone());
            state.following = following.into_iter().collect();
            states.insert(username.clone(), state);
        }
        for username in &usernames {
            let following = states.get(username).map(|s| s.following.clone()).unwrap_or_default();
            for followee in following {
                if let Some(followee_state) = states.get_mut(&followee) {
                    followee_state.followers.insert(username.clone());
                }
            }
        }
        let users = states
            .into_iter()
            .map(|(name, state)| (name, Arc::new(Mutex::new(state))))
            .collect();
        Ok(Registry {
            users: RwLock::new(users),
            store,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn get_or_none(&self, username: &str) -> Option<UserHandle> {
        self.users.read().await.get(username).cloned()
    }

    /// Handle a `Login` call: validate the username, create the user on
    /// first sight -- seeding their follow list with their own username, so
    /// self-authored posts mirror into their own inbound log via the normal
    /// fan-out loop -- or mark an existing, currently-disconnected user as
    /// connected. A `Login` for a user that is already connected fails.
    pub async fn login(&self, username: &str) -> Result<(UserHandle, LoginOutcome), CoreError> {
        let parsed = Username::parse(username)?;
        if let Some(handle) = self.get_or_none(parsed.as_str()).await {
            return Self::reconnect(handle).await;
        }

        let mut users = self.users.write().await;
        if let Some(handle) = users.get(parsed.as_str()).cloned() {
            return Self::reconnect(handle).await;
        }

        self.store.append_user(parsed.as_str())?;
        let mut following = self.store.load_following(parsed.as_str())?;
        if following.is_empty() {
            following.push(parsed.as_str().to_owned());
            self.store.save_following(parsed.as_str(), &following)?;
        }
        let mut state = UserState::new(parsed.as_str().to_owned());
        state.following = following.into_iter().collect();
        state.followers.insert(parsed.as_str().to_owned());
        state.connected = true;
        let handle = Arc::new(Mutex::new(state));
        users.insert(parsed.as_str().to_owned(), handle.clone());
        Ok((handle, LoginOutcome::New))
    }

    async fn reconnect(handle: UserHandle) -> Result<(UserHandle, LoginOutcome), CoreError> {
        let mut state = handle.lock().await;
        if state.connected {
            return Err(CoreError::AlreadyConnected);
        }
        state.connected = true;
        drop(state);
        Ok((handle, LoginOutcome::Existing))
    }

    /// Mark `username` disconnected, e.g. when their RPC connection closes.
    /// A no-op for an unknown user.
    pub async fn disconnect(&self, username: &str) {
        if let Some(handle) = self.get_or_none(username).await {
            handle.lock().await.connected = false;
        }
    }

    /// All registered usernames, in registration order, plus every user that
    /// follows `username`.
    pub async fn list(&self, username: &str) -> Result<(Vec<String>, Vec<String>), CoreError> {
        let all_users = self.store.load_all_users()?;
        let handle = self.get_or_none(username).await.ok_or(CoreError::UnknownUser)?;
        let state = handle.lock().await;
        let mut followers: Vec<String> = state.followers.iter().cloned().collect();
        followers.sort();
        Ok((all_users, followers))
    }

    /// `username` starts following `target`. Updates both users' in-memory
    /// state and persists `username`'s follow list. A user may not follow
    /// themselves.
    pub async fn follow(&self, username: &str, target: &str) -> Result<(), CoreError> {
        if username == target {
            return Err(CoreError::SelfTarget);
        }
        let follower = self.get_or_none(username).await.ok_or(CoreError::UnknownUser)?;
        let followee = self.get_or_none(target).await.ok_or(CoreError::UnknownUser)?;

        {
            let mut follower_state = follower.lock().await;
            if !follower_state.following.insert(target.to_owned()) {
                return Err(CoreError::AlreadyFollowing);
            }
            let following: Vec<String> = follower_state.following.iter().cloned().collect();
            self.store.save_following(username, &following)?;
        }
        followee.lock().await.followers.insert(username.to_owned());
        Ok(())
    }

    /// `username` stops following `target`. A user may not unfollow
    /// themselves (and can't, since self-following is permanent).
    pub async fn unfollow(&self, username: &str, target: &str) -> Result<(), CoreError> {
        if username == target {
            return Err(CoreError::SelfTarget);
        }
        let follower = self.get_or_none(username).await.ok_or(CoreError::UnknownUser)?;
        let followee = self.get_or_none(target).await.ok_or(CoreError::UnknownUser)?;

        {
            let mut follower_state = follower.lock().await;
            if !follower_state.following.remove(target) {
                return Err(CoreError::NotFollowing);
            }
            let following: Vec<String> = follower_state.following.iter().cloned().collect();
            self.store.save_following(username, &following)?;
        }
        followee.lock().await.followers.remove(username);
        Ok(())
    }

    /// `poster` publishes `post`: fan it out to every current follower's
    /// in-memory buffer and durable inbound log, mirror it into each
    /// follower's durable outbound log too (matching the poster themselves,
    /// since they follow themselves from creation), and wake their attached
    /// streamer, if any.
    pub async fn publish(&self, poster: &str, post: Post) -> Result<(), CoreError> {
        let handle = self.get_or_none(poster).await.ok_or(CoreError::UnknownUser)?;
        let followers: Vec<String> = {
            let state = handle.lock().await;
            state.followers.iter().cloned().collect()
        };
        for follower in followers {
            if let Some(follower_handle) = self.get_or_none(&follower).await {
                self.store.append_post(&follower, &post)?;
                self.store.append_outbound_post(&follower, &post)?;
                let notify = {
                    let mut state = follower_handle.lock().await;
                    state.buffer.push(post.clone());
                    state.notify.clone()
                };
                notify.notify_waiters();
            }
        }
        Ok(())
    }

    /// Replay the newest buffered posts for `username` (durable log, capped
    /// at the same depth as the in-memory buffer) for a client that just
    /// attached its timeline stream, and return the `Notify` to await
    /// further pushes on.
    pub async fn attach_timeline(&self, username: &str) -> Result<(Vec<Post>, Arc<Notify>), CoreError> {
        let handle = self.get_or_none(username).await.ok_or(CoreError::UnknownUser)?;
        let replay = self.store.load_recent_timeline(username)?;
        let notify = handle.lock().await.notify.clone();
        Ok((replay, notify))
    }

    /// Drain any posts pushed to `username`'s in-memory buffer since the last
    /// drain, oldest first.
    pub async fn drain_new_posts(&self, username: &str) -> Vec<Post> {
        let Some(handle) = self.get_or_none(username).await else {
            return Vec::new();
        };
        let mut state = handle.lock().await;
        state.buffer.entries.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (Registry, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (Registry::load(store).unwrap(), dir)
    }

    #[tokio::test]
    async fn login_creates_then_returns_existing_after_disconnect() {
        let (reg, _dir) = registry();
        let (_h, outcome) = reg.login("alice").await.unwrap();
        assert_eq!(outcome, LoginOutcome::New);
        reg.disconnect("alice").await;
        let (_h2, outcome2) = reg.login("alice").await.unwrap();
        assert_eq!(outcome2, LoginOutcome::Existing);
    }

    #[tokio::test]
    async fn second_login_while_connected_is_rejected() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        assert!(matches!(reg.login("alice").await, Err(CoreError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn login_rejects_invalid_username() {
        let (reg, _dir) = registry();
        assert!(matches!(reg.login("bad name").await, Err(CoreError::InvalidUsername(_))));
    }

    #[tokio::test]
    async fn new_user_follows_and_is_followed_by_self() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        let (_all_users, followers) = reg.list("alice").await.unwrap();
        assert_eq!(followers, vec!["alice"]);
    }

    #[tokio::test]
    async fn follow_then_duplicate_follow_fails() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("alice", "bob").await.unwrap();
        assert!(matches!(reg.follow("alice", "bob").await, Err(CoreError::AlreadyFollowing)));
    }

    #[tokio::test]
    async fn follow_self_is_rejected() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        assert!(matches!(reg.follow("alice", "alice").await, Err(CoreError::SelfTarget)));
    }

    #[tokio::test]
    async fn unfollow_self_is_rejected() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        assert!(matches!(reg.unfollow("alice", "alice").await, Err(CoreError::SelfTarget)));
    }

    #[tokio::test]
    async fn unfollow_without_following_fails() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        assert!(matches!(reg.unfollow("alice", "bob").await, Err(CoreError::NotFollowing)));
    }

    #[tokio::test]
    async fn publish_fans_out_to_followers_buffer() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("bob", "alice").await.unwrap();

        let post = Post::new("alice", "hi", 1).unwrap();
        reg.publish("alice", post.clone()).await.unwrap();

        let drained = reg.drain_new_posts("bob").await;
        assert_eq!(drained, vec![post]);
    }

    #[tokio::test]
    async fn buffer_evicts_oldest_beyond_cap() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("bob", "alice").await.unwrap();

        for i in 0..(BUFFER_CAP as i64 + 5) {
            let post = Post::new("alice", "hi", i).unwrap();
            reg.publish("alice", post).await.unwrap();
        }
        let drained = reg.drain_new_posts("bob").await;
        assert_eq!(drained.len(), BUFFER_CAP);
        assert_eq!(drained[0].seconds_since_epoch, 5);
    }

    #[tokio::test]
    async fn attach_timeline_replays_durable_log() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("bob", "alice").await.unwrap();
        let post = Post::new("alice", "hi", 1).unwrap();
        reg.publish("alice", post.clone()).await.unwrap();

        let (replay, _notify) = reg.attach_timeline("bob").await.unwrap();
        assert_eq!(replay, vec![post]);
    }

    #[tokio::test]
    async fn load_rehydrates_follow_graph_from_disk() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let reg = Registry::load(store).unwrap();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("bob", "alice").await.unwrap();

        // Simulate a restart: reopen the same data dir as a fresh registry.
        let reopened_store = Store::open(dir.path()).unwrap();
        let reloaded = Registry::load(reopened_store).unwrap();
        let (all_users, followers) = reloaded.list("alice").await.unwrap();
        assert_eq!(all_users, vec!["alice", "bob"]);
        assert_eq!(followers, vec!["alice", "bob"]);

        // A previously-connected user is disconnected after reload, so they
        // can log back in rather than being rejected as already-connected.
        let (_h, outcome) = reloaded.login("alice").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Existing);
    }

    #[tokio::test]
    async fn list_returns_roster_and_followers() {
        let (reg, _dir) = registry();
        reg.login("alice").await.unwrap();
        reg.login("bob").await.unwrap();
        reg.follow("alice", "bob").await.unwrap();

        // bob follows himself (seeded on creation) and is followed by alice.
        let (all_users, followers) = reg.list("bob").await.unwrap();
        assert_eq!(all_users, vec!["alice", "bob"]);
        assert_eq!(followers, vec!["alice", "bob"]);
    }
}
