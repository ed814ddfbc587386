//! Message segments.
//!
//! A message is an ordered list of `{"type": ..., "data": {...}}` segments.
//! Only the segments the engine itself needs to build or read are typed;
//! everything else survives decoding as [`Segment::Unknown`] with its data
//! intact, so forwarding a message never loses content.
//!
//! # Example
//!
//! ```rust,ignore
//! use onebot11_core::{Message, Segment};
//!
//! let message = Message::new()
//!     .push(Segment::reply("1024"))
//!     .push(Segment::at(10001000))
//!     .push(Segment::text(" hello"));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::de::value_to_text;

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSegment", into = "RawSegment")]
pub enum Segment {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Built-in face/emoji.
    Face {
        /// Face ID.
        id: String,
    },
    /// Image.
    Image {
        /// File name, path or URL.
        file: String,
        /// Download URL (inbound only).
        url: Option<String>,
    },
    /// Voice record.
    Record {
        /// File name, path or URL.
        file: String,
        /// Download URL (inbound only).
        url: Option<String>,
    },
    /// Mention; `qq` is a user ID or `"all"`.
    At {
        /// Target user ID, or `"all"`.
        qq: String,
    },
    /// Reply to a message.
    Reply {
        /// Message ID being replied to.
        id: String,
    },
    /// Any other segment type, kept verbatim.
    Unknown {
        /// The `type` field.
        kind: String,
        /// The `data` object.
        data: Map<String, Value>,
    },
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a face segment.
    pub fn face(id: i32) -> Self {
        Self::Face { id: id.to_string() }
    }

    /// Creates an image segment.
    pub fn image(file: impl Into<String>) -> Self {
        Self::Image {
            file: file.into(),
            url: None,
        }
    }

    /// Creates a voice record segment.
    pub fn record(file: impl Into<String>) -> Self {
        Self::Record {
            file: file.into(),
            url: None,
        }
    }

    /// Creates a mention of one user.
    pub fn at(user_id: i64) -> Self {
        Self::At {
            qq: user_id.to_string(),
        }
    }

    /// Creates a mention of everyone in the group.
    pub fn at_all() -> Self {
        Self::At {
            qq: "all".to_string(),
        }
    }

    /// Creates a reply segment.
    pub fn reply(message_id: impl ToString) -> Self {
        Self::Reply {
            id: message_id.to_string(),
        }
    }

    /// Returns the wire `type` of this segment.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Face { .. } => "face",
            Self::Image { .. } => "image",
            Self::Record { .. } => "record",
            Self::At { .. } => "at",
            Self::Reply { .. } => "reply",
            Self::Unknown { kind, .. } => kind,
        }
    }

    /// Returns the text of a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Wire shape of a segment.
#[derive(Serialize, Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    data: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<RawSegment> for Segment {
    fn from(raw: RawSegment) -> Self {
        let field = |key: &str| raw.data.get(key).and_then(value_to_text);
        let typed = match raw.kind.as_str() {
            "text" => field("text").map(|text| Self::Text { text }),
            "face" => field("id").map(|id| Self::Face { id }),
            "image" => field("file").map(|file| Self::Image {
                file,
                url: field("url"),
            }),
            "record" => field("file").map(|file| Self::Record {
                file,
                url: field("url"),
            }),
            "at" => field("qq").map(|qq| Self::At { qq }),
            "reply" => field("id").map(|id| Self::Reply { id }),
            _ => None,
        };
        typed.unwrap_or(Self::Unknown {
            kind: raw.kind,
            data: raw.data,
        })
    }
}

impl From<Segment> for RawSegment {
    fn from(segment: Segment) -> Self {
        let mut data = Map::new();
        let kind = segment.kind().to_string();
        match segment {
            Segment::Text { text } => {
                data.insert("text".into(), text.into());
            }
            Segment::Face { id } | Segment::Reply { id } => {
                data.insert("id".into(), id.into());
            }
            Segment::Image { file, url } | Segment::Record { file, url } => {
                data.insert("file".into(), file.into());
                if let Some(url) = url {
                    data.insert("url".into(), url.into());
                }
            }
            Segment::At { qq } => {
                data.insert("qq".into(), qq.into());
            }
            Segment::Unknown { data: raw, .. } => data = raw,
        }
        Self { kind, data }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered list of segments.
///
/// Decodes from either the array format or the string format; a string is
/// kept as a single text segment without CQ-code parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Message(pub Vec<Segment>);

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment, builder style.
    pub fn push(mut self, segment: Segment) -> Self {
        self.0.push(segment);
        self
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Returns `true` if the message has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates the text segments.
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(Segment::as_text).collect()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Segments(Vec<Segment>),
            Single(Segment),
            Text(String),
        }

        Ok(match Option::<Repr>::deserialize(deserializer)? {
            None => Self::default(),
            Some(Repr::Segments(segments)) => Self(segments),
            Some(Repr::Single(segment)) => Self(vec![segment]),
            Some(Repr::Text(text)) => Self(vec![Segment::text(text)]),
        })
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self(vec![segment])
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Segment::text(text).into()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Segment::text(text).into()
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
