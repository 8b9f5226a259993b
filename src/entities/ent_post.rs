// Post entity - feed item, public when group_id is null

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Author, Entity};
use crate::infrastructure::gateway::{Blob, Table};

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mov", "webm", "m4v", "avi", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify an uploaded file's public URL by its extension.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author: Author,
    pub title: Option<String>,
    /// Serialized rich-text document; opaque here.
    pub content: String,
    pub content_text: String,
    pub group_id: Option<String>,
    pub media: Vec<MediaItem>,
    pub likes_count: i64,
    pub comments_count: i64,
    pub views_count: i64,
    pub has_liked: bool,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn is_public(&self) -> bool {
        self.group_id.is_none()
    }
}

/// Stored shape of a post in the `posts` table
#[derive(Debug, Clone, Deserialize)]
pub struct PostRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_text: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub likes_count: Option<i64>,
    #[serde(default)]
    pub comments_count: Option<i64>,
    #[serde(default)]
    pub views_count: Option<i64>,
    #[serde(default)]
    pub is_pinned: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for PostRow {
    fn table() -> Table {
        Table::Posts
    }
}

impl PostRow {
    pub fn author_id(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.author_id.as_deref())
    }

    pub fn into_post(self, author: Author) -> Post {
        let media = self
            .media_urls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, url)| MediaItem {
                id: format!("{}-{}", self.id, index),
                kind: MediaKind::from_url(&url),
                url,
            })
            .collect();

        Post {
            id: self.id,
            author,
            title: self.title,
            content: self.content,
            content_text: self.content_text,
            group_id: self.group_id,
            media,
            likes_count: self.likes_count.unwrap_or(0),
            comments_count: self.comments_count.unwrap_or(0),
            views_count: self.views_count.unwrap_or(0),
            has_liked: false,
            is_pinned: self.is_pinned.unwrap_or(false),
            updated_at: self.updated_at.unwrap_or(self.created_at),
            created_at: self.created_at,
        }
    }
}

/// Input to `PostRepository::create_post`
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub content: String,
    pub content_text: String,
    pub title: Option<String>,
    pub media_files: Vec<Blob>,
    pub group_id: Option<String>,
}

impl NewPost {
    pub fn text(content_text: impl Into<String>) -> Self {
        let text = content_text.into();
        Self {
            content: text.clone(),
            content_text: text,
            ..Self::default()
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_media(mut self, media_files: Vec<Blob>) -> Self {
        self.media_files = media_files;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
            && self.content_text.trim().is_empty()
            && self.media_files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_kind_from_url() {
        assert_eq!(MediaKind::from_url("https://cdn/media/u1/1-a.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::from_url("https://cdn/media/u1/1-a.png?token=x"), MediaKind::Image);
        assert_eq!(MediaKind::from_url("https://cdn/media/u1/noext"), MediaKind::Image);
    }

    #[test]
    fn test_row_into_post_defaults() {
        let row = PostRow::from_row(
            json!({
                "id": "p1",
                "user_id": "u1",
                "content": "<p>Hi</p>",
                "content_text": "Hi",
                "media_urls": ["https://cdn/a.png", "https://cdn/b.webm"],
                "created_at": "2024-05-01T10:00:00Z"
            })
            .as_object()
            .cloned()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(row.author_id(), Some("u1"));

        let post = row.into_post(Author::unknown("u1"));
        assert!(post.is_public());
        assert!(!post.is_pinned);
        assert_eq!(post.likes_count, 0);
        assert_eq!(post.updated_at, post.created_at);
        assert_eq!(post.media[0].id, "p1-0");
        assert_eq!(post.media[1].kind, MediaKind::Video);
    }

    #[test]
    fn test_empty_new_post() {
        assert!(NewPost::text("   ").is_empty());
        assert!(!NewPost::text("hello").is_empty());
        let media_only = NewPost::default().with_media(vec![Blob::new("a.png", "image/png", vec![1])]);
        assert!(!media_only.is_empty());
    }
}
