//! Integrity coordinator: every operation that reads or changes more than one
//! record runs here, under the store's write lock and inside one transaction.
//!
//! Invariants kept:
//! - a list's owner exists; a todo's list exists and has the todo's owner;
//! - usernames and emails are unique across users;
//! - deleting a user or a list removes everything that hangs off it.
//!
//! Any error rolls the transaction back, so no partial cascade is ever committed.

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::{
    error::AppError,
    model::{ListPatch, Priority, Todo, TodoList, TodoPatch, User, UserPatch},
    password::hash_password,
    schema::{CreateListSchema, CreateTodoSchema, CreateUserSchema, ListResponse, TodoFilter, UserResponse},
    store::{self, Filter, Store},
};

pub struct Coordinator {
    store: Store,
}

impl Coordinator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- users ----

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::list_all::<User>(&mut conn).await?)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::get::<User>(&mut conn, id).await?)
    }

    pub async fn create_user(&self, input: CreateUserSchema) -> Result<User, AppError> {
        require("username", &input.username)?;
        require("email", &input.email)?;
        require("password", &input.password)?;
        let password = input.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|err| AppError::Credential(format!("password hashing task failed: {err}")))??;

        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            ensure_unique(conn, None, Some(input.username.as_str()), Some(input.email.as_str())).await?;
            let user = User::new(input.username, input.email, password_hash);
            store::put(conn, &user).await?;
            Ok::<_, AppError>(user)
        }
        .await;
        let user = txn.finish("create user", outcome).await?;

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub async fn update_user(&self, id: &str, patch: UserPatch) -> Result<User, AppError> {
        if let Some(username) = &patch.username {
            require("username", username)?;
        }
        if let Some(email) = &patch.email {
            require("email", email)?;
        }

        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            let mut user = store::get::<User>(conn, id).await?;
            ensure_unique(conn, Some(id), patch.username.as_deref(), patch.email.as_deref()).await?;
            user.apply(&patch);
            store::put(conn, &user).await?;
            Ok::<_, AppError>(user)
        }
        .await;
        txn.finish("update user", outcome).await
    }

    /// Removes the user together with every list and todo they own.
    pub async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            store::get::<User>(conn, id).await?;
            let owned = Filter::new().eq("user_id", id);
            let todos = store::delete_where::<Todo>(conn, &owned).await?;
            let lists = store::delete_where::<TodoList>(conn, &owned).await?;
            store::delete::<User>(conn, id).await?;
            Ok::<_, AppError>((lists, todos))
        }
        .await;
        let (lists, todos) = txn.finish("delete user", outcome).await?;

        info!(user_id = id, lists, todos, "user deleted");
        Ok(())
    }

    // ---- lists ----

    pub async fn list_lists(&self, user_id: Option<&str>) -> Result<Vec<TodoList>, AppError> {
        let filter = match user_id.filter(|id| !id.is_empty()) {
            Some(user_id) => Filter::new().eq("user_id", user_id),
            None => Filter::new(),
        };
        let mut conn = self.store.acquire().await?;
        Ok(store::list_where::<TodoList>(&mut conn, &filter).await?)
    }

    pub async fn get_list(&self, id: &str) -> Result<TodoList, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::get::<TodoList>(&mut conn, id).await?)
    }

    /// Lists owned by `user_id`, in creation order.
    pub async fn lists_of_user(&self, user_id: &str) -> Result<Vec<TodoList>, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::list_where::<TodoList>(&mut conn, &Filter::new().eq("user_id", user_id)).await?)
    }

    pub async fn create_list(&self, input: CreateListSchema) -> Result<TodoList, AppError> {
        require("title", &input.title)?;
        require("user_id", &input.user_id)?;

        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            store::get::<User>(conn, &input.user_id).await?;
            let list = TodoList::new(
                input.title,
                input.description.unwrap_or_default(),
                input.user_id,
            );
            store::put(conn, &list).await?;
            Ok::<_, AppError>(list)
        }
        .await;
        let list = txn.finish("create list", outcome).await?;

        debug!(list_id = %list.id, user_id = %list.user_id, "list created");
        Ok(list)
    }

    pub async fn update_list(&self, id: &str, patch: ListPatch) -> Result<TodoList, AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            let mut list = store::get::<TodoList>(conn, id).await?;
            list.apply(&patch);
            store::put(conn, &list).await?;
            Ok::<_, AppError>(list)
        }
        .await;
        txn.finish("update list", outcome).await
    }

    /// Removes the list and every todo in it.
    pub async fn delete_list(&self, id: &str) -> Result<(), AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            store::get::<TodoList>(conn, id).await?;
            let todos = store::delete_where::<Todo>(conn, &Filter::new().eq("list_id", id)).await?;
            store::delete::<TodoList>(conn, id).await?;
            Ok::<_, AppError>(todos)
        }
        .await;
        let todos = txn.finish("delete list", outcome).await?;

        debug!(list_id = id, todos, "list deleted");
        Ok(())
    }

    // ---- todos ----

    pub async fn list_todos(&self, filter: &TodoFilter) -> Result<Vec<Todo>, AppError> {
        let mut predicate = Filter::new();
        if let Some(user_id) = &filter.user_id {
            predicate = predicate.eq("user_id", user_id.as_str());
        }
        if let Some(list_id) = &filter.list_id {
            predicate = predicate.eq("list_id", list_id.as_str());
        }
        if let Some(completed) = filter.completed {
            predicate = predicate.eq("is_completed", completed);
        }

        let mut conn = self.store.acquire().await?;
        Ok(store::list_where::<Todo>(&mut conn, &predicate).await?)
    }

    pub async fn get_todo(&self, id: &str) -> Result<Todo, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::get::<Todo>(&mut conn, id).await?)
    }

    /// Todos in `list_id`, in creation order.
    pub async fn todos_of_list(&self, list_id: &str) -> Result<Vec<Todo>, AppError> {
        let mut conn = self.store.acquire().await?;
        Ok(store::list_where::<Todo>(&mut conn, &Filter::new().eq("list_id", list_id)).await?)
    }

    pub async fn create_todo(&self, input: CreateTodoSchema) -> Result<Todo, AppError> {
        require("title", &input.title)?;
        require("list_id", &input.list_id)?;
        require("user_id", &input.user_id)?;

        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            store::get::<User>(conn, &input.user_id).await?;
            let list = store::get::<TodoList>(conn, &input.list_id).await?;
            ensure_owner(&list, &input.user_id)?;

            let due_date = match &input.due_date {
                Some(due) => due.resolve()?,
                None => None,
            };
            let todo = Todo::new(
                input.title,
                input.description.unwrap_or_default(),
                input.list_id,
                input.user_id,
                due_date,
                input.priority.unwrap_or(Priority::Low),
            );
            store::put(conn, &todo).await?;
            Ok::<_, AppError>(todo)
        }
        .await;
        let todo = txn.finish("create todo", outcome).await?;

        debug!(todo_id = %todo.id, list_id = %todo.list_id, "todo created");
        Ok(todo)
    }

    /// Applies `patch`; a new `list_id` moves the todo, which must stay with its owner.
    pub async fn update_todo(&self, id: &str, patch: TodoPatch) -> Result<Todo, AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            let mut todo = store::get::<Todo>(conn, id).await?;

            if let Some(list_id) = patch.list_id.as_deref().filter(|list_id| *list_id != todo.list_id) {
                let target = store::find::<TodoList>(conn, list_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("New list with ID: {list_id} not found")))?;
                ensure_owner(&target, &todo.user_id)?;
                debug!(todo_id = id, from = %todo.list_id, to = list_id, "moving todo");
                todo.list_id = target.id;
            }

            todo.apply(&patch)?;
            store::put(conn, &todo).await?;
            Ok::<_, AppError>(todo)
        }
        .await;
        txn.finish("update todo", outcome).await
    }

    pub async fn toggle_todo(&self, id: &str) -> Result<Todo, AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            let conn = txn.conn();
            let mut todo = store::get::<Todo>(conn, id).await?;
            todo.toggle_completion();
            store::put(conn, &todo).await?;
            Ok::<_, AppError>(todo)
        }
        .await;
        txn.finish("toggle todo", outcome).await
    }

    pub async fn delete_todo(&self, id: &str) -> Result<(), AppError> {
        let mut txn = self.store.begin_write().await?;
        let outcome = async {
            store::delete::<Todo>(txn.conn(), id).await?;
            Ok::<_, AppError>(())
        }
        .await;
        txn.finish("delete todo", outcome).await
    }

    // ---- views ----

    pub async fn user_view(&self, user: User, include_lists: bool) -> Result<UserResponse, AppError> {
        let mut conn = self.store.acquire().await?;
        let lists = store::list_where::<TodoList>(&mut conn, &Filter::new().eq("user_id", user.id.as_str())).await?;
        let list_count = lists.len();

        let todo_lists = if include_lists {
            let mut views = Vec::with_capacity(lists.len());
            for list in lists {
                views.push(list_view_on(&mut conn, list, false).await?);
            }
            Some(views)
        } else {
            None
        };

        Ok(UserResponse::new(user, list_count, todo_lists))
    }

    pub async fn list_view(&self, list: TodoList, include_todos: bool) -> Result<ListResponse, AppError> {
        let mut conn = self.store.acquire().await?;
        list_view_on(&mut conn, list, include_todos).await
    }
}

async fn list_view_on(
    conn: &mut SqliteConnection,
    list: TodoList,
    include_todos: bool,
) -> Result<ListResponse, AppError> {
    let in_list = Filter::new().eq("list_id", list.id.as_str());
    let (todo_count, todos) = if include_todos {
        let todos = store::list_where::<Todo>(conn, &in_list).await?;
        (todos.len(), Some(todos))
    } else {
        let count = store::count_where::<Todo>(conn, &in_list).await?;
        (usize::try_from(count).unwrap_or_default(), None)
    };

    Ok(ListResponse {
        list,
        todo_count,
        todos,
    })
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("Field '{field}' must not be empty")));
    }
    Ok(())
}

fn ensure_owner(list: &TodoList, user_id: &str) -> Result<(), AppError> {
    if list.user_id != user_id {
        return Err(AppError::PermissionDenied(format!(
            "List with ID: {} does not belong to user {}",
            list.id, user_id
        )));
    }
    Ok(())
}

/// Full scan over users; `exclude` is the user being updated.
async fn ensure_unique(
    conn: &mut SqliteConnection,
    exclude: Option<&str>,
    username: Option<&str>,
    email: Option<&str>,
) -> Result<(), AppError> {
    let users = store::list_all::<User>(conn).await?;
    for user in users.iter().filter(|user| Some(user.id.as_str()) != exclude) {
        if username == Some(user.username.as_str()) {
            return Err(AppError::Conflict("Username already in use".to_string()));
        }
        if email == Some(user.email.as_str()) {
            return Err(AppError::Conflict("Email already in use".to_string()));
        }
    }
    Ok(())
}
