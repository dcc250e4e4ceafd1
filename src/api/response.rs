use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Page;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
    #[serde(skip)]
    status: StatusCode,
}

/// Pagination details for list endpoints
#[derive(Debug, Default, Serialize)]
pub struct ResponseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: Utc::now(),
            metadata: None,
            status: StatusCode::OK,
        }
    }

    /// 201 with the created resource
    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::success(data)
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        let metadata = self.metadata.take().unwrap_or_default();
        self.metadata = Some(ResponseMetadata {
            total_count: Some(count),
            ..metadata
        });
        self
    }

    pub fn with_pagination(mut self, page: usize, page_size: usize, total: usize, total_pages: usize) -> Self {
        self.metadata = Some(ResponseMetadata {
            total_count: Some(total),
            page: Some(page),
            page_size: Some(page_size),
            total_pages: Some(total_pages),
        });
        self
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    /// Envelope a page of results with its pagination metadata
    pub fn page(page: Page<T>) -> Self {
        let Page {
            items,
            page,
            page_size,
            total,
            total_pages,
        } = page;
        ApiResponse::success(items).with_pagination(page, page_size, total, total_pages)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse::success(data)
}
