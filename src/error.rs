use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Некорректный JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Таймаут: {0}")]
    Timeout(String),

    #[error("Несовпадение идентичности манифеста: ожидалось '{expected}', получено '{found}'")]
    IdentityMismatch { expected: String, found: String },

    #[error("Не найдено: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! loader_error {
    (timeout, $($arg:tt)*) => {
        $crate::error::LoaderError::Timeout(format!($($arg)*))
    };
    (not_found, $($arg:tt)*) => {
        $crate::error::LoaderError::NotFound(format!($($arg)*))
    };
}
