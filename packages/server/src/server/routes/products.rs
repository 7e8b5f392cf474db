use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use numbering::NumberingError;
use serde::{Deserialize, Serialize};

use crate::domains::products::models::{NewProduct, Product};
use crate::server::app::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

/// Handler error mapped to a JSON response.
///
/// Lock timeouts become 503 so clients know the whole request may be retried.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, retryable) = match self {
            Self::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason, false),
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_string(), false),
            Self::Internal(e) => match e.downcast_ref::<NumberingError>() {
                Some(numbering_err) if numbering_err.is_retryable() => {
                    tracing::warn!(error = %numbering_err, "numbering lock timed out");
                    (StatusCode::SERVICE_UNAVAILABLE, numbering_err.to_string(), true)
                }
                _ => {
                    tracing::error!(error = ?e, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                        false,
                    )
                }
            },
        };

        (status, Json(ErrorBody { error, retryable })).into_response()
    }
}

#[derive(Serialize)]
pub struct CreatedProduct {
    #[serde(flatten)]
    pub product: Product,
    /// Candidates tried before the number was assigned; absent when the
    /// request carried its own number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

/// Create a product and assign its number inside the insert transaction
pub async fn create_product_handler(
    Extension(state): Extension<AppState>,
    Json(input): Json<NewProduct>,
) -> Result<(StatusCode, Json<CreatedProduct>), ApiError> {
    if input.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let (product, assigned) = Product::create(input, &state.numbering, &state.db_pool).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedProduct {
            product,
            attempts: assigned.map(|a| a.attempts),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub async fn list_products_handler(
    Extension(state): Extension<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Product>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    Ok(Json(Product::find_recent(limit, &state.db_pool).await?))
}

pub async fn get_product_handler(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    Product::find_by_id(id, &state.db_pool)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}
