//! Translates `RpcRequest`s into `RpcReply`s against a `Registry`.
//!
//! Kept separate from `Registry` itself so the reply-text wire contract
//! (`tsn_protocol::reply_text`) lives next to the thing that produces it
//! rather than inside the storage/concurrency layer.

use tsn_protocol::{reply_text, RpcReply, RpcRequest, StatusCode};

use crate::registry::{CoreError, LoginOutcome, Registry};

/// Handle one unary call. Never returns `Err` -- every `CoreError` is mapped
/// to a `Reply` with an appropriate `StatusCode`, matching the original's
/// behavior of always returning a reply string rather than tearing down the
/// connection on a bad request.
pub async fn handle(registry: &Registry, request: RpcRequest) -> RpcReply {
    match request {
        RpcRequest::Login { username } => handle_login(registry, &username).await,
        RpcRequest::List { username } => handle_list(registry, &username).await,
        RpcRequest::Follow { username, target } => handle_follow(registry, &username, &target).await,
        RpcRequest::Unfollow { username, target } => handle_unfollow(registry, &username, &target).await,
    }
}

async fn handle_login(registry: &Registry, username: &str) -> RpcReply {
    match registry.login(username).await {
        Ok((_handle, LoginOutcome::New)) => RpcReply::Reply {
            status: StatusCode::Success,
            msg: reply_text::LOGIN_SUCCESS.to_owned(),
        },
        Ok((_handle, LoginOutcome::Existing)) => RpcReply::Reply {
            status: StatusCode::Success,
            msg: reply_text::welcome_back(username),
        },
        Err(CoreError::InvalidUsername(_)) | Err(CoreError::AlreadyConnected) => RpcReply::Reply {
            status: StatusCode::InvalidUsername,
            msg: reply_text::LOGIN_INVALID.to_owned(),
        },
        Err(e) => RpcReply::Reply {
            status: StatusCode::FailureUnknown,
            msg: e.to_string(),
        },
    }
}

async fn handle_list(registry: &Registry, username: &str) -> RpcReply {
    match registry.list(username).await {
        Ok((all_users, followers)) => RpcReply::ListReply { all_users, followers },
        Err(e) => RpcReply::Reply {
            status: StatusCode::FailureUnknown,
            msg: e.to_string(),
        },
    }
}

async fn handle_follow(registry: &Registry, username: &str, target: &str) -> RpcReply {
    match registry.follow(username, target).await {
        Ok(()) => RpcReply::Reply {
            status: StatusCode::Success,
            msg: reply_text::FOLLOW_SUCCESS.to_owned(),
        },
        Err(CoreError::AlreadyFollowing) => RpcReply::Reply {
            status: StatusCode::AlreadyExists,
            msg: reply_text::FOLLOW_ALREADY.to_owned(),
        },
        Err(CoreError::UnknownUser) | Err(CoreError::InvalidUsername(_)) | Err(CoreError::SelfTarget) => RpcReply::Reply {
            status: StatusCode::FailureInvalid,
            msg: reply_text::FOLLOW_INVALID.to_owned(),
        },
        Err(e) => RpcReply::Reply {
            status: StatusCode::FailureUnknown,
            msg: e.to_string(),
        },
    }
}

async fn handle_unfollow(registry: &Registry, username: &str, target: &str) -> RpcReply {
    match registry.unfollow(username, target).await {
        Ok(()) => RpcReply::Reply {
            status: StatusCode::Success,
            msg: reply_text::UNFOLLOW_SUCCESS.to_owned(),
        },
        Err(CoreError::NotFollowing) => RpcReply::Reply {
            status: StatusCode::FailureInvalid,
            msg: reply_text::UNFOLLOW_NOT_FOLLOWING.to_owned(),
        },
        Err(CoreError::UnknownUser) | Err(CoreError::InvalidUsername(_)) | Err(CoreError::SelfTarget) => RpcReply::Reply {
            status: StatusCode::FailureInvalid,
            msg: reply_text::UNFOLLOW_INVALID.to_owned(),
        },
        Err(e) => RpcReply::Reply {
            status: StatusCode::FailureUnknown,
            msg: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Store;
    use tempfile::TempDir;

    fn registry() -> (Registry, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (Registry::load(store).unwrap(), dir)
    }

    #[tokio::test]
    async fn login_new_user_gets_success_text() {
        let (reg, _dir) = registry();
        let reply = handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        assert_eq!(
            reply,
            RpcReply::Reply {
                status: StatusCode::Success,
                msg: reply_text::LOGIN_SUCCESS.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn login_returning_user_gets_welcome_back() {
        let (reg, _dir) = registry();
        handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        reg.disconnect("alice").await;
        let reply = handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        assert_eq!(
            reply,
            RpcReply::Reply {
                status: StatusCode::Success,
                msg: reply_text::welcome_back("alice"),
            }
        );
    }

    #[tokio::test]
    async fn second_login_while_connected_is_invalid() {
        let (reg, _dir) = registry();
        handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        let reply = handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        assert_eq!(
            reply,
            RpcReply::Reply {
                status: StatusCode::InvalidUsername,
                msg: reply_text::LOGIN_INVALID.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn follow_unknown_target_is_invalid() {
        let (reg, _dir) = registry();
        handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        let reply = handle(
            &reg,
            RpcRequest::Follow {
                username: "alice".to_owned(),
                target: "ghost".to_owned(),
            },
        )
        .await;
        assert_eq!(
            reply,
            RpcReply::Reply {
                status: StatusCode::FailureInvalid,
                msg: reply_text::FOLLOW_INVALID.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn double_follow_reports_already_following() {
        let (reg, _dir) = registry();
        handle(&reg, RpcRequest::Login { username: "alice".to_owned() }).await;
        handle(&reg, RpcRequest::Login { username: "bob".to_owned() }).await;
        let follow = RpcRequest::Follow {
            username: "alice".to_owned(),
            target: "bob".to_owned(),
        };
        handle(&reg, follow.clone()).await;
        let reply = handle(&reg, follow).await;
        assert_eq!(
            reply,
            RpcReply::Reply {
                status: StatusCode::AlreadyExists,
                msg: reply_text::FOLLOW_ALREADY.to_owned(),
            }
        );
    }
}
