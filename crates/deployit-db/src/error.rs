//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid stored value: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for deployit_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => deployit_core::Error::NotFound(what),
            other => deployit_core::Error::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployit_core::ErrorKind;

    #[test]
    fn test_maps_into_core_taxonomy() {
        let not_found: deployit_core::Error = DbError::NotFound("deployment x".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let decode: deployit_core::Error = DbError::Decode("state".into()).into();
        assert_eq!(decode.kind(), ErrorKind::Persistence);
    }
}
