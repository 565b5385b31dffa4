use todo_graph_api::model::{Priority, Todo, TodoList, User};
use todo_graph_api::store::{self, Filter, Store, StoreLocation};
use todo_graph_api::StoreError;

async fn memory_store() -> Store {
    Store::open(&StoreLocation::Memory).await.unwrap()
}

async fn seed_user(store: &Store, username: &str) -> User {
    let user = User::new(username, format!("{username}@example.com"), "hash");
    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &user).await.unwrap();
    txn.commit().await.unwrap();
    user
}

#[tokio::test]
async fn opens_with_empty_collections() {
    let store = memory_store().await;
    let mut conn = store.acquire().await.unwrap();

    assert!(store::list_all::<User>(&mut conn).await.unwrap().is_empty());
    assert!(store::list_all::<TodoList>(&mut conn).await.unwrap().is_empty());
    assert!(store::list_all::<Todo>(&mut conn).await.unwrap().is_empty());
}

#[tokio::test]
async fn put_get_and_overwrite() {
    let store = memory_store().await;
    let mut user = seed_user(&store, "alice").await;

    let mut conn = store.acquire().await.unwrap();
    let loaded = store::get::<User>(&mut conn, &user.id).await.unwrap();
    assert_eq!(loaded, user);
    drop(conn);

    user.email = "alice@work.example".to_string();
    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &user).await.unwrap();
    txn.commit().await.unwrap();

    let mut conn = store.acquire().await.unwrap();
    let all = store::list_all::<User>(&mut conn).await.unwrap();
    assert_eq!(all, vec![user]);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let store = memory_store().await;
    let mut conn = store.acquire().await.unwrap();

    let err = store::get::<Todo>(&mut conn, "nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: "Todo", .. }));
    assert!(store::find::<Todo>(&mut conn, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_missing_record_is_not_found() {
    let store = memory_store().await;
    let mut txn = store.begin_write().await.unwrap();

    let err = store::delete::<User>(txn.conn(), "ghost").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: "User", .. }));
}

#[tokio::test]
async fn rollback_discards_pending_changes() {
    let store = memory_store().await;
    let user = User::new("bob", "bob@example.com", "hash");

    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &user).await.unwrap();
    txn.rollback().await.unwrap();

    let mut conn = store.acquire().await.unwrap();
    assert!(store::find::<User>(&mut conn, &user.id).await.unwrap().is_none());
}

#[tokio::test]
async fn dropping_a_transaction_discards_it() {
    let store = memory_store().await;
    let user = User::new("carol", "carol@example.com", "hash");

    {
        let mut txn = store.begin_write().await.unwrap();
        store::put(txn.conn(), &user).await.unwrap();
    }

    let mut conn = store.acquire().await.unwrap();
    assert!(store::find::<User>(&mut conn, &user.id).await.unwrap().is_none());
}

#[tokio::test]
async fn filters_combine_with_and() {
    let store = memory_store().await;
    let user = seed_user(&store, "dave").await;
    let list = TodoList::new("Errands", "", &user.id);
    let mut done = Todo::new("Post", "", &list.id, &user.id, None, Priority::High);
    done.toggle_completion();
    let open = Todo::new("Bank", "", &list.id, &user.id, None, Priority::Low);

    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &list).await.unwrap();
    store::put(txn.conn(), &done).await.unwrap();
    store::put(txn.conn(), &open).await.unwrap();
    txn.commit().await.unwrap();

    let mut conn = store.acquire().await.unwrap();
    let in_list = Filter::new().eq("list_id", list.id.as_str());
    let completed = in_list.clone().eq("is_completed", true);

    let all = store::list_where::<Todo>(&mut conn, &in_list).await.unwrap();
    assert_eq!(all, vec![done.clone(), open]);

    let only_done = store::list_where::<Todo>(&mut conn, &completed).await.unwrap();
    assert_eq!(only_done, vec![done]);
    assert_eq!(store::count_where::<Todo>(&mut conn, &completed).await.unwrap(), 1);
}

#[tokio::test]
async fn todo_must_sit_in_a_list_of_its_owner() {
    let store = memory_store().await;
    let owner = seed_user(&store, "erin").await;
    let intruder = seed_user(&store, "frank").await;
    let list = TodoList::new("Private", "", &owner.id);
    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &list).await.unwrap();
    txn.commit().await.unwrap();

    let foreign = Todo::new("Sneaky", "", &list.id, &intruder.id, None, Priority::Low);
    let mut txn = store.begin_write().await.unwrap();
    let err = store::put(txn.conn(), &foreign).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

#[tokio::test]
async fn list_requires_existing_owner() {
    let store = memory_store().await;
    let orphan = TodoList::new("Orphan", "", "no-such-user");

    let mut txn = store.begin_write().await.unwrap();
    let err = store::put(txn.conn(), &orphan).await.unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
}

#[tokio::test]
async fn delete_where_reports_removed_rows() {
    let store = memory_store().await;
    let user = seed_user(&store, "gina").await;
    let list = TodoList::new("Chores", "", &user.id);

    let mut txn = store.begin_write().await.unwrap();
    store::put(txn.conn(), &list).await.unwrap();
    for title in ["Dishes", "Laundry", "Vacuum"] {
        let todo = Todo::new(title, "", &list.id, &user.id, None, Priority::Medium);
        store::put(txn.conn(), &todo).await.unwrap();
    }
    let removed = store::delete_where::<Todo>(txn.conn(), &Filter::new().eq("list_id", list.id.as_str()))
        .await
        .unwrap();
    txn.commit().await.unwrap();

    assert_eq!(removed, 3);
}

#[tokio::test]
async fn file_store_persists_and_manages_lock_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("todoapp.db");
    let lock = dir.path().join("data").join("todoapp.db.lock");
    let lock_tmp = dir.path().join("data").join("todoapp.db.lock.tmp");

    std::fs::create_dir_all(db_path.parent().unwrap()).unwrap();
    std::fs::write(&lock, b"stale").unwrap();
    std::fs::write(&lock_tmp, b"stale").unwrap();

    let location = StoreLocation::File(db_path.clone());
    let store = Store::open(&location).await.unwrap();
    assert!(!lock_tmp.exists());
    assert_eq!(
        std::fs::read_to_string(&lock).unwrap(),
        std::process::id().to_string()
    );

    let user = seed_user(&store, "hank").await;
    store.close().await.unwrap();
    assert!(store.is_closed());
    assert!(!lock.exists());

    let reopened = Store::open(&location).await.unwrap();
    let mut conn = reopened.acquire().await.unwrap();
    let loaded = store::get::<User>(&mut conn, &user.id).await.unwrap();
    assert_eq!(loaded, user);
    drop(conn);
    reopened.close().await.unwrap();
}
