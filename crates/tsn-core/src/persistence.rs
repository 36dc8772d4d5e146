//! Flat-file persistence for the user directory, follow lists, and per-user
//! timeline logs.
//!
//! Deliberately not a database: the original kept one append-only file per
//! list, and the spec's data model maps directly onto that (see `Journal` in
//! the forwarder service for the analogous append-then-replay shape, here
//! done with plain files instead of sqlite since there is no need for
//! transactional multi-row updates).
//!
//! Layout under `data_dir`:
//!   users.txt                    one username per line, append-only global roster
//!   users/<name>.list            one followed-username per line
//!   timelines/<name>following.log   durable inbound timeline, append-only
//!   timelines/<name>.log         durable outbound mirror, append-only

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tsn_protocol::Post;

#[derive(Debug)]
pub enum PersistenceError {
    Io(io::Error),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "persistence i/o error: {e}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<io::Error> for PersistenceError {
    fn from(e: io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

/// The last N lines to keep in memory when replaying a timeline to a newly
/// attached client.
pub const TIMELINE_REPLAY_DEPTH: usize = 20;

#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(data_dir.join("users"))?;
        fs::create_dir_all(data_dir.join("timelines"))?;
        let store = Store { data_dir };
        if !store.users_file_path().exists() {
            File::create(store.users_file_path())?;
        }
        Ok(store)
    }

    fn users_file_path(&self) -> PathBuf {
        self.data_dir.join("users.txt")
    }

    fn follow_list_path(&self, username: &str) -> PathBuf {
        self.data_dir.join("users").join(format!("{username}.list"))
    }

    fn inbound_path(&self, username: &str) -> PathBuf {
        self.data_dir.join("timelines").join(format!("{username}following.log"))
    }

    fn outbound_path(&self, username: &str) -> PathBuf {
        self.data_dir.join("timelines").join(format!("{username}.log"))
    }

    /// Load the full global username roster, in file order (registration order).
    pub fn load_all_users(&self) -> Result<Vec<String>, PersistenceError> {
        read_lines(&self.users_file_path())
    }

    /// Append `username` to the global roster. Caller is responsible for
    /// checking it is not already present.
    pub fn append_user(&self, username: &str) -> Result<(), PersistenceError> {
        append_line(&self.users_file_path(), username)
    }

    /// Load the set of usernames `username` follows, in the order they were
    /// followed.
    pub fn load_following(&self, username: &str) -> Result<Vec<String>, PersistenceError> {
        let path = self.follow_list_path(username);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_lines(&path)
    }

    /// Overwrite the follow-list file for `username` with the given full set,
    /// in order. Unfollow removes a single line so the whole list is rewritten
    /// rather than appended; follow lists are small and rewrites are rare
    /// compared to posts.
    pub fn save_following(&self, username: &str, following: &[String]) -> Result<(), PersistenceError> {
        let path = self.follow_list_path(username);
        let mut f = File::create(path)?;
        for name in following {
            writeln!(f, "{name}")?;
        }
        Ok(())
    }

    /// Append one post to `username`'s durable inbound timeline log (posts
    /// received from people `username` follows).
    pub fn append_post(&self, username: &str, post: &Post) -> Result<(), PersistenceError> {
        let path = self.inbound_path(username);
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        f.write_all(post.to_line().as_bytes())?;
        Ok(())
    }

    /// Append one post to `username`'s durable outbound mirror log. A user
    /// follows themselves from creation, so their own posts land here too
    /// via the same fan-out loop that writes every follower's inbound log.
    pub fn append_outbound_post(&self, username: &str, post: &Post) -> Result<(), PersistenceError> {
        let path = self.outbound_path(username);
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        f.write_all(post.to_line().as_bytes())?;
        Ok(())
    }

    /// Load up to the newest `TIMELINE_REPLAY_DEPTH` posts from `username`'s
    /// durable inbound timeline, oldest first, for replay on stream attach.
    pub fn load_recent_timeline(&self, username: &str) -> Result<Vec<Post>, PersistenceError> {
        let path = self.inbound_path(username);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let lines = read_lines(&path)?;
        let start = lines.len().saturating_sub(TIMELINE_REPLAY_DEPTH);
        Ok(lines[start..].iter().filter_map(|l| Post::parse_line(l)).collect())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, PersistenceError> {
    let f = File::open(path)?;
    let reader = io::BufReader::new(f);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

fn append_line(path: &Path, line: &str) -> Result<(), PersistenceError> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn roster_round_trips() {
        let (store, _dir) = store();
        store.append_user("alice").unwrap();
        store.append_user("bob").unwrap();
        assert_eq!(store.load_all_users().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn follow_list_round_trips() {
        let (store, _dir) = store();
        store.save_following("alice", &["bob".to_owned(), "carol".to_owned()]).unwrap();
        assert_eq!(store.load_following("alice").unwrap(), vec!["bob", "carol"]);
    }

    #[test]
    fn missing_follow_list_is_empty() {
        let (store, _dir) = store();
        assert!(store.load_following("nobody").unwrap().is_empty());
    }

    #[test]
    fn outbound_mirror_is_a_separate_file_from_inbound() {
        let (store, dir) = store();
        let post = Post::new("alice", "hi", 1).unwrap();
        store.append_outbound_post("alice", &post).unwrap();
        assert!(store.load_recent_timeline("alice").unwrap().is_empty());
        assert!(dir.path().join("timelines").join("alice.log").exists());
        assert!(!dir.path().join("timelines").join("alicefollowing.log").exists());
    }

    #[test]
    fn timeline_replay_caps_at_depth() {
        let (store, _dir) = store();
        for i in 0..25 {
            let post = Post::new("bob", "hi", i).unwrap();
            store.append_post("alice", &post).unwrap();
        }
        let recent = store.load_recent_timeline("alice").unwrap();
        assert_eq!(recent.len(), TIMELINE_REPLAY_DEPTH);
        assert_eq!(recent[0].seconds_since_epoch, 5);
        assert_eq!(recent[19].seconds_since_epoch, 24);
    }
}
