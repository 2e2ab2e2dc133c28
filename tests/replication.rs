//! Two nodes syncing over loopback HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use kvass::api::HttpServer;
use kvass::config::SyncConfig;
use kvass::node::Node;
use kvass::store::{EntryStore, SyncKey, TokenLookup};

/// Start a server node sharing `key`; returns its store and address
async fn spawn_peer(key: &SyncKey, pid: i64) -> (Arc<EntryStore>, SocketAddr) {
    let store = Arc::new(EntryStore::open_in_memory().unwrap());
    store.set_encryption_key(key.clone()).await.unwrap();
    store.set_pid(pid).await.unwrap();
    let state = store.node_state().await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(addr.to_string(), Arc::clone(&store), &state);
    tokio::spawn(async move { server.serve(listener).await });

    (store, addr)
}

/// A client node pointed at `peer`
async fn local_node(key: &SyncKey, pid: i64, peer: SocketAddr) -> Node {
    let store = Arc::new(EntryStore::open_in_memory().unwrap());
    store.set_encryption_key(key.clone()).await.unwrap();
    store.set_pid(pid).await.unwrap();
    store.set_remote_hostname(&peer.to_string()).await.unwrap();

    let sync = SyncConfig {
        timeout_ms: 2000,
        incremental: true,
    };
    Node::with_store(store, &sync)
}

async fn live_value(store: &EntryStore, key: &str) -> Option<Vec<u8>> {
    store
        .get(key)
        .await
        .unwrap()
        .and_then(|e| e.live_value().map(<[u8]>::to_vec))
}

#[tokio::test]
async fn test_disjoint_writes_converge() {
    let key = SyncKey::generate();
    let (remote, addr) = spawn_peer(&key, 2).await;
    let node = local_node(&key, 1, addr).await;

    remote.put("y", b"2".to_vec()).await.unwrap();
    let set = node.set("x", b"1".to_vec()).await.unwrap();
    assert!(set.warnings().is_empty(), "{:?}", set.warnings());

    for store in [node.store().as_ref(), remote.as_ref()] {
        assert_eq!(live_value(store, "x").await, Some(b"1".to_vec()));
        assert_eq!(live_value(store, "y").await, Some(b"2".to_vec()));
    }

    // the peer echoes back what it merged from us, which changes nothing
    let report = node.sync(false).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.pulled.unwrap().applied, 0);
    assert_eq!(report.pushed, Some(0));

    let report = node.sync(false).await.unwrap();
    assert_eq!(report.pulled.unwrap().received, 0);
    assert_eq!(report.pushed, Some(0));
}

#[tokio::test]
async fn test_hub_forwards_late_low_versions() {
    let key = SyncKey::generate();
    let (hub, addr) = spawn_peer(&key, 1).await;
    let alice = local_node(&key, 2, addr).await;
    let carol = local_node(&key, 3, addr).await;

    alice.set("a1", b"1".to_vec()).await.unwrap();
    alice.set("a2", b"2".to_vec()).await.unwrap();
    alice.sync(false).await.unwrap();

    // carol's first write carries a version below everything alice pulled
    let k = carol.store().put("k", b"from carol".to_vec()).await.unwrap();
    assert_eq!(k.version, 1);
    carol.sync(false).await.unwrap();
    assert_eq!(live_value(&hub, "k").await, Some(b"from carol".to_vec()));

    let report = alice.sync(false).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(
        live_value(alice.store(), "k").await,
        Some(b"from carol".to_vec())
    );
}

#[tokio::test]
async fn test_higher_version_wins() {
    let key = SyncKey::generate();
    let (remote, addr) = spawn_peer(&key, 1).await;
    let node = local_node(&key, 2, addr).await;

    // local pid loses ties, so only the higher version can explain the outcome
    node.store().put("x", b"old".to_vec()).await.unwrap();
    node.store().put("x", b"older".to_vec()).await.unwrap();
    node.store().put("x", b"newest".to_vec()).await.unwrap();
    remote.put("x", b"remote".to_vec()).await.unwrap();

    let report = node.sync(false).await.unwrap();
    assert!(report.is_clean());

    assert_eq!(live_value(node.store(), "x").await, Some(b"newest".to_vec()));
    assert_eq!(live_value(&remote, "x").await, Some(b"newest".to_vec()));
}

#[tokio::test]
async fn test_equal_versions_lower_pid_wins() {
    let key = SyncKey::generate();
    let (remote, addr) = spawn_peer(&key, 1).await;
    let node = local_node(&key, 2, addr).await;

    let mine = node.store().put("x", b"mine".to_vec()).await.unwrap();
    let theirs = remote.put("x", b"theirs".to_vec()).await.unwrap();
    assert_eq!(mine.version, theirs.version);

    node.sync(true).await.unwrap();
    assert_eq!(live_value(node.store(), "x").await, Some(b"theirs".to_vec()));
    assert_eq!(live_value(&remote, "x").await, Some(b"theirs".to_vec()));
}

#[tokio::test]
async fn test_tombstone_propagates() {
    let key = SyncKey::generate();
    let (remote, addr) = spawn_peer(&key, 2).await;
    let node = local_node(&key, 1, addr).await;

    node.set("x", b"1".to_vec()).await.unwrap();
    assert_eq!(live_value(&remote, "x").await, Some(b"1".to_vec()));

    let removed = node.delete("x").await.unwrap();
    assert!(removed.warnings().is_empty());

    let current = remote.get("x").await.unwrap().unwrap();
    assert!(current.deleted);
    assert!(remote.keys().await.unwrap().is_empty());

    // the tombstone itself is still handed out to other peers
    let listed = remote.list_since(0).await.unwrap();
    assert!(listed.iter().any(|e| e.key == "x" && e.deleted));

    // a later read on the local side does not resurrect it
    assert_eq!(node.get("x").await.unwrap().value, None);
}

#[tokio::test]
async fn test_url_token_lifecycle() {
    let key = SyncKey::generate();
    let (remote, addr) = spawn_peer(&key, 2).await;
    let node = local_node(&key, 1, addr).await;

    let entry = node.set("z.html", b"<p>z</p>".to_vec()).await.unwrap().value;
    let url = format!("http://{}/fetch?token={}", addr, entry.url_token);

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"<p>z</p>");

    node.delete("z.html").await.unwrap();
    assert_eq!(
        remote.lookup_by_token(&entry.url_token).await.unwrap(),
        TokenLookup::Gone("z.html".to_string())
    );
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status().as_u16(), 419);

    let response = reqwest::get(format!("http://{}/fetch?token=unknown", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn test_mismatched_key_is_rejected() {
    let (remote, addr) = spawn_peer(&SyncKey::generate(), 2).await;
    let node = local_node(&SyncKey::generate(), 1, addr).await;

    let set = node.set("x", b"1".to_vec()).await.unwrap();
    assert_eq!(set.warnings().len(), 2);
    assert!(set.warnings().iter().all(|w| !w.is_retryable()));
    assert!(remote.get("x").await.unwrap().is_none());
}
