use async_graphql::{
    http::{receive_batch_body, MultipartOptions},
    Executor,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        Method, Request, StatusCode,
    },
    response::Response,
};
use hyper::body::HttpBody;
use tracing::{debug, warn};

use super::{media_type, send_errorf, with_batch_context, write_json, OperationTrace, Transport};

/// Largest accepted multipart body, 32 MiB
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 32 << 20;

/// File uploads following the GraphQL multipart request spec
#[derive(Debug, Clone, Copy)]
pub struct MultipartForm {
    /// Upper bound on the whole request body, and so on each file
    pub max_upload_size: usize,
    /// Upper bound on the number of files, `None` for no limit
    pub max_files: Option<usize>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_files: None,
        }
    }
}

impl MultipartForm {
    fn too_large(&self, detail: String) -> Response {
        debug!("Rejecting multipart form: {}", detail);
        send_errorf(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("failed to parse multipart form, request body too large ({})", detail),
        )
    }

    fn options(&self) -> MultipartOptions {
        let options = MultipartOptions::default().max_file_size(self.max_upload_size);
        match self.max_files {
            Some(max_files) => options.max_num_files(max_files),
            None => options,
        }
    }
}

#[async_trait]
impl<E: Executor> Transport<E> for MultipartForm {
    fn supports(&self, request: &Request<Body>) -> bool {
        request.method() == Method::POST
            && media_type(request).as_deref() == Some("multipart/form-data")
    }

    async fn serve(&self, request: Request<Body>, executor: E) -> Response {
        let (parts, body) = request.into_parts();
        let trace = parts.extensions.get::<OperationTrace>().copied();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if let Some(length) = declared {
            if length > self.max_upload_size as u64 {
                return self.too_large(format!("{} > {} bytes", length, self.max_upload_size));
            }
        }

        let bytes = match read_limited(body, self.max_upload_size).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return self.too_large(format!("over {} bytes", self.max_upload_size));
            }
            Err(e) => {
                warn!("Failed to read multipart body: {}", e);
                return send_errorf(StatusCode::BAD_REQUEST, format!("could not read body: {}", e));
            }
        };

        let batch = match receive_batch_body(
            content_type,
            futures::io::Cursor::new(bytes),
            self.options(),
        )
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                debug!("Rejecting multipart form: {}", e);
                return send_errorf(
                    StatusCode::BAD_REQUEST,
                    format!("failed to parse multipart form: {}", e),
                );
            }
        };

        let batch = with_batch_context(batch, trace, &parts.headers);
        let response = executor.execute_batch(batch).await;
        write_json(StatusCode::OK, &response)
    }
}

/// Reads the body chunk by chunk; `None` once it grows past `limit`
async fn read_limited(mut body: Body, limit: usize) -> Result<Option<Vec<u8>>, hyper::Error> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > limit {
            return Ok(None);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Some(bytes))
}
