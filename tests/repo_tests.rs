#![cfg(feature = "inmem-store")]

use std::collections::HashSet;
use std::sync::Arc;

use marginalia::{
    models::{Actor, NewComment, UpdateComment},
    repo::{inmem::InMemRepo, CommentRepo, RepoError},
};

fn text(t: &str) -> NewComment {
    NewComment { text: t.into(), ..Default::default() }
}

fn reply(t: &str, parent: i64) -> NewComment {
    NewComment { text: t.into(), parent: Some(parent), ..Default::default() }
}

fn owner(token: &str) -> Actor {
    Actor::Owner(Some(token.into()))
}

#[tokio::test]
async fn ids_are_per_thread() {
    let r = InMemRepo::ephemeral();
    assert_eq!(r.create_comment("/a", text("one"), "t").await.unwrap().id, 1);
    assert_eq!(r.create_comment("/a", text("two"), "t").await.unwrap().id, 2);
    assert_eq!(r.create_comment("/b", text("one"), "t").await.unwrap().id, 1);

    assert_eq!(r.list_comments("/a").await.unwrap().len(), 2);
    assert!(r.list_comments("/missing").await.unwrap().is_empty());
    assert!(matches!(r.get_comment("/b", 2).await, Err(RepoError::NotFound)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_share_an_id() {
    let r = Arc::new(InMemRepo::ephemeral());
    let handles: Vec<_> = (0..50)
        .map(|i| {
            let r = r.clone();
            tokio::spawn(async move { r.create_comment("/busy", text(&format!("c{i}")), "t").await })
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        assert!(ids.insert(h.await.unwrap().unwrap().id));
    }
    assert_eq!(ids, (1..=50).collect::<HashSet<_>>());
}

#[tokio::test]
async fn mutation_requires_the_owner_token() {
    let r = InMemRepo::ephemeral();
    r.create_comment("/a", text("mine"), "secret").await.unwrap();

    let upd = || UpdateComment { text: Some("changed".into()), ..Default::default() };
    assert!(matches!(r.update_comment("/a", 1, owner("wrong"), upd()).await, Err(RepoError::Forbidden)));
    assert!(matches!(r.update_comment("/a", 1, Actor::Owner(None), upd()).await, Err(RepoError::Forbidden)));
    assert!(matches!(r.delete_comment("/a", 1, owner("wrong")).await, Err(RepoError::Forbidden)));
    // absent beats forbidden
    assert!(matches!(r.delete_comment("/a", 2, owner("wrong")).await, Err(RepoError::NotFound)));

    let updated = r.update_comment("/a", 1, owner("secret"), upd()).await.unwrap();
    assert_eq!(updated.text, "changed");
    assert!(updated.modified.is_some());

    let updated = r.update_comment("/a", 1, Actor::Privileged, upd()).await.unwrap();
    assert_eq!(updated.id, 1);
}

#[tokio::test]
async fn validation_errors() {
    let r = InMemRepo::ephemeral();
    assert!(matches!(r.create_comment("/a", text(" "), "t").await, Err(RepoError::Invalid(_))));
    assert!(matches!(r.create_comment("/a", reply("x", 1), "t").await, Err(RepoError::Invalid(_))));
    // parent must live in the same thread
    r.create_comment("/b", text("b1"), "t").await.unwrap();
    assert!(matches!(r.create_comment("/a", reply("x", 1), "t").await, Err(RepoError::Invalid(_))));
    assert!(r.list_comments("/a").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_tombstones_referenced_comments_and_prunes_later() {
    let r = InMemRepo::ephemeral();
    r.create_comment("/t", NewComment { text: "root".into(), author: Some("alice".into()), ..Default::default() }, "a").await.unwrap();
    r.create_comment("/t", reply("child", 1), "b").await.unwrap();
    r.create_comment("/t", reply("grandchild", 2), "c").await.unwrap();

    let tomb = r.delete_comment("/t", 1, owner("a")).await.unwrap().expect("tombstone");
    assert!(tomb.deleted);
    assert!(tomb.text.is_empty() && tomb.author.is_none());
    let tomb = r.delete_comment("/t", 2, owner("b")).await.unwrap().expect("tombstone");
    assert_eq!(tomb.parent, Some(1));

    // tombstones can't be edited or deleted again
    assert!(matches!(
        r.update_comment("/t", 1, owner("a"), UpdateComment::default()).await,
        Err(RepoError::NotFound)
    ));
    assert!(matches!(r.delete_comment("/t", 2, owner("b")).await, Err(RepoError::NotFound)));

    // listing keeps tombstones, redacted
    let all = r.list_comments("/t").await.unwrap();
    assert_eq!(all.iter().map(|c| (c.id, c.deleted)).collect::<Vec<_>>(), vec![(1, true), (2, true), (3, false)]);

    // erasing the last leaf sweeps the whole stale chain
    assert!(r.delete_comment("/t", 3, owner("c")).await.unwrap().is_none());
    assert!(r.list_comments("/t").await.unwrap().is_empty());
}

#[tokio::test]
async fn erased_ids_are_reassigned_with_a_new_owner() {
    let r = InMemRepo::ephemeral();
    r.create_comment("/p", text("foo"), "mallory").await.unwrap();
    assert!(r.delete_comment("/p", 1, owner("mallory")).await.unwrap().is_none());

    let c = r.create_comment("/p", text("bar"), "bob").await.unwrap();
    assert_eq!(c.id, 1);
    assert!(matches!(r.delete_comment("/p", 1, owner("mallory")).await, Err(RepoError::Forbidden)));
    assert!(r.delete_comment("/p", 1, owner("bob")).await.is_ok());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let r = InMemRepo::new(&path);
    r.create_comment("/s", NewComment { text: "kept".into(), email: Some("e@example.com".into()), ..Default::default() }, "tok")
        .await
        .unwrap();
    r.create_comment("/s", reply("reply", 1), "tok2").await.unwrap();
    drop(r);

    let r = InMemRepo::new(&path);
    let list = r.list_comments("/s").await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].text, "kept");
    // owner tokens are persisted too
    assert!(r.delete_comment("/s", 2, owner("tok2")).await.unwrap().is_none());
    assert!(matches!(r.delete_comment("/s", 1, owner("nope")).await, Err(RepoError::Forbidden)));
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"{ definitely not a snapshot").unwrap();

    let r = InMemRepo::new(&path);
    assert!(r.list_comments("/anything").await.unwrap().is_empty());
    r.create_comment("/anything", text("fresh"), "t").await.unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("fresh"));
}

#[tokio::test]
async fn failed_snapshot_write_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    // a regular file where the snapshot directory should be
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();

    let r = InMemRepo::new(blocker.join("state.json"));
    assert!(matches!(r.create_comment("/s", text("lost"), "t").await, Err(RepoError::Internal(_))));
    assert!(r.list_comments("/s").await.unwrap().is_empty());
    assert!(matches!(r.get_comment("/s", 1).await, Err(RepoError::NotFound)));
}
