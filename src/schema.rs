use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{DueDate, Priority, Todo, TodoList, User};

// Struct representing the request body for creating a new User
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserSchema {
    pub username: String,
    pub email: String,
    pub password: String,
}

// Struct representing the request body for creating a new TodoList
#[derive(Debug, Clone, Deserialize)]
pub struct CreateListSchema {
    pub title: String,
    pub user_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

// Struct representing the request body for creating a new Todo
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTodoSchema {
    pub title: String,
    pub list_id: String,
    pub user_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DueDate>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQuery {
    pub include_lists: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub include_todos: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilterQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoFilterQuery {
    pub user_id: Option<String>,
    pub list_id: Option<String>,
    pub completed: Option<String>,
}

/// Query flags count as set only for a case-insensitive `true`.
pub fn flag(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map_or(false, |value| value.eq_ignore_ascii_case("true"))
}

/// Filters for listing todos. Set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoFilter {
    pub user_id: Option<String>,
    pub list_id: Option<String>,
    pub completed: Option<bool>,
}

impl From<TodoFilterQuery> for TodoFilter {
    fn from(query: TodoFilterQuery) -> Self {
        let completed = query.completed.as_ref().map(|_| flag(&query.completed));
        Self {
            user_id: query.user_id.filter(|id| !id.is_empty()),
            list_id: query.list_id.filter(|id| !id.is_empty()),
            completed,
        }
    }
}

// JSON representation of a User; the password hash never leaves the server
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub list_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todo_lists: Option<Vec<ListResponse>>,
}

impl UserResponse {
    pub fn new(user: User, list_count: usize, todo_lists: Option<Vec<ListResponse>>) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
            updated_at: user.updated_at,
            list_count,
            todo_lists,
        }
    }
}

// JSON representation of a TodoList
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    #[serde(flatten)]
    pub list: TodoList,
    pub todo_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<Todo>>,
}
