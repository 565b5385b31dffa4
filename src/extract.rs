use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Query},
    http::{request::Parts, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// JSON body extractor whose rejections (bad syntax, missing fields, wrong types)
/// come back as 400 responses in the API's error shape.
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for Payload<T>
where
    Json<T>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = AppError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

/// Query string extractor with the same error shape as [`Payload`].
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}
