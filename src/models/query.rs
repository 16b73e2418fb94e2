use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Column a sort key maps to in the relational backend
pub trait SortColumn {
    fn column(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    OriginalFilename,
    FileSize,
}

impl SortColumn for DocumentSort {
    fn column(&self) -> &'static str {
        match self {
            DocumentSort::CreatedAt => "created_at",
            DocumentSort::UpdatedAt => "updated_at",
            DocumentSort::OriginalFilename => "original_filename",
            DocumentSort::FileSize => "file_size",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonSort {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortColumn for ComparisonSort {
    fn column(&self) -> &'static str {
        match self {
            ComparisonSort::CreatedAt => "created_at",
            ComparisonSort::UpdatedAt => "updated_at",
        }
    }
}

/// Ordering and pagination for owner listings.
///
/// Rows that tie on the sort key are ordered by id in the same direction, so
/// every backend returns the same sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions<S> {
    pub order_by: S,
    pub direction: SortDirection,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl<S> FindOptions<S> {
    pub fn ordered(order_by: S, direction: SortDirection) -> Self {
        Self {
            order_by,
            direction,
            limit: None,
            offset: 0,
        }
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}
