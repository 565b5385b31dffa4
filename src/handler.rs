use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    error::AppError,
    extract::{Params, Payload},
    model::{ListPatch, TodoPatch, UserPatch},
    schema::{
        flag, CreateListSchema, CreateTodoSchema, CreateUserSchema, ListFilterQuery, ListQuery,
        TodoFilter, TodoFilterQuery, UserQuery,
    },
    AppState,
};

// Handler for the health checker route
pub async fn health_checker_handler() -> impl IntoResponse {
    const MESSAGE: &str = "Users, lists and todos REST API with Rust, SQLx, SQLite, and Axum";

    let json_response = serde_json::json!({
        "status": "success",
        "message": MESSAGE
    });

    Json(json_response)
}

// ---- users ----

pub async fn get_users(State(data): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let users = data.coordinator.list_users().await?;

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        views.push(data.coordinator.user_view(user, false).await?);
    }
    Ok(Json(views))
}

pub async fn get_user(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
    Params(query): Params<UserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.coordinator.get_user(&id).await?;
    let view = data
        .coordinator
        .user_view(user, flag(&query.include_lists))
        .await?;
    Ok(Json(view))
}

pub async fn create_user(
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<CreateUserSchema>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.coordinator.create_user(body).await?;
    let view = data.coordinator.user_view(user, false).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_user(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<UserPatch>,
) -> Result<impl IntoResponse, AppError> {
    let user = data.coordinator.update_user(&id, body).await?;
    let view = data.coordinator.user_view(user, false).await?;
    Ok(Json(view))
}

pub async fn delete_user(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    data.coordinator.delete_user(&id).await?;
    Ok(Json(json!({ "message": "User and their data deleted" })))
}

// ---- lists ----

pub async fn get_lists(
    State(data): State<Arc<AppState>>,
    Params(query): Params<ListFilterQuery>,
) -> Result<impl IntoResponse, AppError> {
    let lists = data.coordinator.list_lists(query.user_id.as_deref()).await?;

    let mut views = Vec::with_capacity(lists.len());
    for list in lists {
        views.push(data.coordinator.list_view(list, false).await?);
    }
    Ok(Json(views))
}

pub async fn get_list(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
    Params(query): Params<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let list = data.coordinator.get_list(&id).await?;
    let view = data
        .coordinator
        .list_view(list, flag(&query.include_todos))
        .await?;
    Ok(Json(view))
}

pub async fn create_list(
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<CreateListSchema>,
) -> Result<impl IntoResponse, AppError> {
    let list = data.coordinator.create_list(body).await?;
    let view = data.coordinator.list_view(list, false).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_list(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<ListPatch>,
) -> Result<impl IntoResponse, AppError> {
    let list = data.coordinator.update_list(&id, body).await?;
    let view = data.coordinator.list_view(list, false).await?;
    Ok(Json(view))
}

pub async fn delete_list(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    data.coordinator.delete_list(&id).await?;
    Ok(Json(json!({ "message": "List and its todos deleted" })))
}

// ---- todos ----

pub async fn get_todos(
    State(data): State<Arc<AppState>>,
    Params(query): Params<TodoFilterQuery>,
) -> Result<impl IntoResponse, AppError> {
    let todos = data.coordinator.list_todos(&TodoFilter::from(query)).await?;
    Ok(Json(todos))
}

pub async fn get_todo(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let todo = data.coordinator.get_todo(&id).await?;
    Ok(Json(todo))
}

pub async fn create_todo(
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<CreateTodoSchema>,
) -> Result<impl IntoResponse, AppError> {
    let todo = data.coordinator.create_todo(body).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn update_todo(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
    Payload(body): Payload<TodoPatch>,
) -> Result<impl IntoResponse, AppError> {
    let todo = data.coordinator.update_todo(&id, body).await?;
    Ok(Json(todo))
}

// Handler for flipping a Todo between open and completed
pub async fn toggle_todo_complete(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let todo = data.coordinator.toggle_todo(&id).await?;
    Ok(Json(todo))
}

pub async fn delete_todo(
    Path(id): Path<String>,
    State(data): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    data.coordinator.delete_todo(&id).await?;
    Ok(Json(json!({ "message": "Todo deleted" })))
}
