//! Chat feed ordering, pagination, and moderation.

mod common;

use collabd::chat::{self, PostMessageInput};
use collabd::error::ApiError;
use collabd::storage::UserRow;
use collabd::workspace;
use collabd::AppContext;
use common::*;

fn text(body: &str) -> PostMessageInput {
    PostMessageInput {
        body: body.to_string(),
        message_type: None,
    }
}

async fn join(ctx: &AppContext, owner: &UserRow, user: &UserRow, ws: i64, role: &str) {
    let token = invite(ctx, owner, ws, &user.email, role).await;
    workspace::accept_invite(ctx, user, &token).await.unwrap();
}

#[tokio::test]
async fn pages_come_back_oldest_first_with_a_cursor() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    for i in 1..=7 {
        chat::post_message(&ctx, &alice, ws.id, text(&format!("msg {i}")))
            .await
            .unwrap();
    }

    let page = chat::list_messages(&ctx, &alice, ws.id, Some(3), None)
        .await
        .unwrap();
    assert!(page.has_more);
    let bodies: Vec<&str> = page.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["msg 5", "msg 6", "msg 7"]);

    // Page backwards from the oldest id of the first page.
    let cursor = page.messages[0].id;
    let older = chat::list_messages(&ctx, &alice, ws.id, Some(3), Some(cursor))
        .await
        .unwrap();
    let bodies: Vec<&str> = older.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["msg 2", "msg 3", "msg 4"]);
    assert!(older.has_more);

    let oldest = chat::list_messages(&ctx, &alice, ws.id, Some(3), Some(older.messages[0].id))
        .await
        .unwrap();
    assert_eq!(oldest.messages.len(), 1);
    assert_eq!(oldest.messages[0].body, "msg 1");
    assert!(!oldest.has_more);
}

#[tokio::test]
async fn messages_carry_the_author_display_name() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;
    let message = chat::post_message(&ctx, &alice, ws.id, text("hello")).await.unwrap();
    assert_eq!(message.author_name, "Alice");
    assert_eq!(message.message_type, "text");
}

#[tokio::test]
async fn non_members_cannot_read_or_post() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let mallory = make_user(&ctx, "mallory@example.com", "Mallory").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    let err = chat::post_message(&ctx, &mallory, ws.id, text("hi")).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    let err = chat::list_messages(&ctx, &mallory, ws.id, None, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn empty_and_oversized_bodies_are_rejected() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    let err = chat::post_message(&ctx, &alice, ws.id, text("   ")).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    let huge = "x".repeat(5000);
    let err = chat::post_message(&ctx, &alice, ws.id, text(&huge)).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn deletion_is_author_or_owner_only() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let bob = make_user(&ctx, "bob@example.com", "Bob").await;
    let carol = make_user(&ctx, "carol@example.com", "Carol").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;
    join(&ctx, &alice, &bob, ws.id, "admin").await;
    join(&ctx, &alice, &carol, ws.id, "member").await;

    let message = chat::post_message(&ctx, &carol, ws.id, text("delete me")).await.unwrap();

    // An admin who is neither the author nor the owner may not delete it.
    let err = chat::delete_message(&ctx, &bob, ws.id, message.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert!(ctx.storage.get_message(message.id).await.unwrap().is_some());

    // The author may.
    chat::delete_message(&ctx, &carol, ws.id, message.id).await.unwrap();
    assert!(ctx.storage.get_message(message.id).await.unwrap().is_none());

    // And so may the owner.
    let message = chat::post_message(&ctx, &carol, ws.id, text("again")).await.unwrap();
    chat::delete_message(&ctx, &alice, ws.id, message.id).await.unwrap();
}
