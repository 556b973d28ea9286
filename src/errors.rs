use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response;
use rocket::serde::json::serde_json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FileStoreError>;

#[derive(Error, Debug)]
pub enum FileStoreError {
    /// Malformed input, reported to the caller as is.
    #[error("{0}")]
    Validation(String),

    /// Missing entity, or one the caller doesn't own.
    #[error("{0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    #[error("database error {0:?}")]
    DbError(#[from] diesel::result::Error),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FileStoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        FileStoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        FileStoreError::NotFound(msg.into())
    }

    pub fn status(&self) -> Status {
        match self {
            FileStoreError::Validation(_) | FileStoreError::UserAlreadyExists(_) => {
                Status::BadRequest
            }
            FileStoreError::NotFound(_) => Status::NotFound,
            FileStoreError::Unauthorized => Status::Unauthorized,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> response::Responder<'r, 'static> for FileStoreError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let message = if status == Status::InternalServerError {
            // dependency failures aren't retried, the details only go to the logs
            log::error!("got a dependency error! {:?}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = serde_json::json!({ "error": message }).to_string();
        response::Response::build()
            .sized_body(body.len(), Cursor::new(body))
            .status(status)
            .header(ContentType::JSON)
            .ok()
    }
}
