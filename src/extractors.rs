use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use serde::de::DeserializeOwned;
use tracing::warn;
use validator::Validate;

use crate::error::AppError;

pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            warn!("JSON Deserialization Error: {}", e);
            match e {
                // A body that parses but does not fit the schema is a
                // different failure than one that does not parse at all.
                JsonRejection::JsonDataError(e) => AppError::UnexpectedData(e.to_string()),
                other => AppError::BadRequest(other.to_string()),
            }
        })?;

        value.validate().map_err(|e| {
            warn!(target: "validation", "Input validation failed: {:?}", e);
            AppError::ValidationError(e)
        })?;

        Ok(ValidatedJson(value))
    }
}

/// JSON body that may be absent. The read endpoints take their filters as an
/// optional body; an empty body means "no filters".
pub struct OptionalJson<T>(pub T);

impl<S, T> FromRequest<S> for OptionalJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        if bytes.is_empty() {
            return Ok(OptionalJson(T::default()));
        }

        let value = serde_json::from_slice(&bytes).map_err(|e| {
            warn!("JSON Deserialization Error: {}", e);
            match e.classify() {
                serde_json::error::Category::Data => AppError::UnexpectedData(e.to_string()),
                _ => AppError::BadRequest(e.to_string()),
            }
        })?;

        Ok(OptionalJson(value))
    }
}
