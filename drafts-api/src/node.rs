use uuid::Uuid;

use crate::{Error, Time, User, UserId, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn stub() -> NodeId {
        NodeId(STUB_UUID)
    }
}

/// One article or comment as the backend serializes it.
///
/// Which fields are populated depends on the endpoint: the top-level listing
/// carries no voter relations and usually no children, the detail endpoint
/// nests children up to the requested depth. Everything except the id
/// defaults when absent, so payloads from older backend versions still parse.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_id: Option<UserId>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub upvoters: Vec<User>,
    #[serde(default)]
    pub downvoters: Vec<User>,
    #[serde(default)]
    pub children: Vec<Node>,
    /// Total reply count as known by the server, which can exceed the number
    /// of children actually included in this payload.
    #[serde(default)]
    pub child_count: Option<u32>,
    #[serde(default)]
    pub created_at: Option<Time>,
    #[serde(default)]
    pub updated_at: Option<Time>,
}

/// An image attached to a node. The backend serializes these either as a
/// plain URL string or as an upload record whose stored path may be missing
/// on older rows, in which case it can be reconstructed from the filename
/// and upload date.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    #[serde(rename_all = "camelCase")]
    Record {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        created_at: Option<Time>,
    },
}

/// Payload for creating an article (no parent) or a reply.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNode {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
}

/// Length at which a reply's derived title is cut.
const REPLY_TITLE_CHARS: usize = 50;

impl CreateNode {
    pub fn root(title: &str, content: &str) -> CreateNode {
        CreateNode {
            title: title.trim().to_string(),
            content: content.to_string(),
            parent_id: None,
        }
    }

    /// Replies carry no title of their own; derive one from the start of the
    /// content so title-only listings still show something readable.
    pub fn reply(parent: NodeId, content: &str) -> CreateNode {
        let trimmed = content.trim();
        let mut title: String = trimmed.chars().take(REPLY_TITLE_CHARS).collect();
        if trimmed.chars().nth(REPLY_TITLE_CHARS).is_some() {
            title.push_str("...");
        }
        CreateNode {
            title,
            content: content.to_string(),
            parent_id: Some(parent),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.content.trim().is_empty() {
            return Err(Error::EmptyContent);
        }
        if self.parent_id.is_none() && self.title.trim().is_empty() {
            return Err(Error::EmptyContent);
        }
        Ok(())
    }
}

/// Partial edit; absent fields are left untouched by the backend.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl UpdateNode {
    pub fn validate(&self) -> Result<(), Error> {
        match &self.content {
            Some(content) if content.trim().is_empty() => Err(Error::EmptyContent),
            _ => Ok(()),
        }
    }
}

/// Largest upload the backend accepts.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// An image file queued for upload alongside a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.content_type.starts_with("image/") {
            return Err(Error::InvalidImage(format!(
                "unsupported content type {:?}",
                self.content_type
            )));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::InvalidImage(format!(
                "{} bytes is over the {} byte limit",
                self.bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shallow_listing_payload() {
        let node: Node = serde_json::from_str(
            r#"{
                "id": "a9f6ba22-0aa9-4464-b512-8aadf9f7e45b",
                "title": "hello",
                "content": "world",
                "authorId": "5a9c010a-52d3-44b3-9a1c-bb2ea8eef323",
                "childCount": 3
            }"#,
        )
        .unwrap();
        assert_eq!(node.title, "hello");
        assert_eq!(node.child_count, Some(3));
        assert!(node.children.is_empty());
        assert!(node.upvoters.is_empty());
        assert!(node.created_at.is_none());
        assert!(node.author.is_none());
    }

    #[test]
    fn parses_both_image_shapes() {
        let images: Vec<ImageRef> = serde_json::from_str(
            r#"[
                "https://example.org/a.png",
                { "path": "uploads/images/2023/01/05/b.png" },
                { "filename": "c.png", "createdAt": "2023-01-05T10:00:00Z" }
            ]"#,
        )
        .unwrap();
        assert_eq!(images[0], ImageRef::Url("https://example.org/a.png".to_string()));
        assert!(matches!(&images[1], ImageRef::Record { path: Some(p), .. } if p.ends_with("b.png")));
        assert!(matches!(
            &images[2],
            ImageRef::Record {
                path: None,
                filename: Some(f),
                created_at: Some(_),
            } if f == "c.png"
        ));
    }

    #[test]
    fn reply_titles_are_cut_from_content() {
        let parent = NodeId::stub();
        let short = CreateNode::reply(parent, "short enough");
        assert_eq!(short.title, "short enough");

        let long = CreateNode::reply(parent, &"x".repeat(80));
        assert_eq!(long.title.chars().count(), 53);
        assert!(long.title.ends_with("..."));

        // cutting must never split a multi-byte character
        let wide = CreateNode::reply(parent, &"é".repeat(80));
        assert!(wide.title.starts_with("é"));
        assert!(wide.title.ends_with("..."));
    }

    #[test]
    fn validation_rejects_blank_content() {
        assert_eq!(
            CreateNode::root("title", "  \n ").validate(),
            Err(Error::EmptyContent)
        );
        assert_eq!(
            CreateNode::root(" ", "content").validate(),
            Err(Error::EmptyContent)
        );
        assert_eq!(CreateNode::root("t", "c").validate(), Ok(()));
        // replies do not need a real title
        assert_eq!(CreateNode::reply(NodeId::stub(), "c").validate(), Ok(()));

        let empty_edit = UpdateNode {
            title: Some("new".to_string()),
            content: Some("".to_string()),
        };
        assert_eq!(empty_edit.validate(), Err(Error::EmptyContent));
    }

    #[test]
    fn validation_rejects_bad_uploads() {
        let pdf = ImageUpload {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![0; 16],
        };
        assert!(matches!(pdf.validate(), Err(Error::InvalidImage(_))));

        let huge = ImageUpload {
            filename: "big.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0; MAX_IMAGE_BYTES + 1],
        };
        assert!(matches!(huge.validate(), Err(Error::InvalidImage(_))));

        let ok = ImageUpload {
            filename: "ok.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0; 16],
        };
        assert_eq!(ok.validate(), Ok(()));
    }
}
