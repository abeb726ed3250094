pub mod admin;
pub mod client;
pub mod health;
pub mod payment;

use axum::Json;

use crate::error::AppError;
use crate::models::ApiResponse;

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

pub fn ok<T: serde::Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}
