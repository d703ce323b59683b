//! Typed ID aliases for the pipeline's entities.

pub use super::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for archive users (owners of connected accounts).
pub struct User;

/// Marker type for connected platform accounts.
pub struct ConnectedAccount;

/// Marker type for raw ingestion events.
pub struct RawItem;

/// Marker type for extracted (native-shape) posts.
pub struct ExtractedPost;

/// Marker type for canonical posts.
pub struct CanonicalPost;

/// Marker type for media download records.
pub struct MediaDownload;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for archive users.
pub type UserId = Id<User>;

/// Typed ID for connected platform accounts.
pub type AccountId = Id<ConnectedAccount>;

/// Typed ID for raw ingestion events.
pub type RawItemId = Id<RawItem>;

/// Typed ID for extracted posts.
pub type ExtractedPostId = Id<ExtractedPost>;

/// Typed ID for canonical posts.
pub type CanonicalPostId = Id<CanonicalPost>;

/// Typed ID for media download records.
pub type MediaDownloadId = Id<MediaDownload>;
