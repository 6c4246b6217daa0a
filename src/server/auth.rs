//! Shared-secret check for the ingestion endpoints.

use axum::http::HeaderMap;

use crate::pipeline::IngestError;

/// Header carrying the ingest secret.
pub const INGEST_SECRET_HEADER: &str = "x-ingest-secret";

/// Require the request to carry the configured secret.
pub fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), IngestError> {
    let provided = headers
        .get(INGEST_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(IngestError::Authorization)?;

    if !expected.is_empty() && secrets_match(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(IngestError::Authorization)
    }
}

/// Comparison whose running time does not depend on where the inputs differ.
fn secrets_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret {
            headers.insert(INGEST_SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
        }
        headers
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(&headers(Some("s3cret")), "s3cret").is_ok());
        assert!(authorize(&headers(Some("s3cre")), "s3cret").is_err());
        assert!(authorize(&headers(Some("S3CRET")), "s3cret").is_err());
        assert!(authorize(&headers(None), "s3cret").is_err());
        assert!(authorize(&headers(Some("")), "").is_err());
    }
}
