//! Read-only view over an incoming federation message.
//!
//! Inbox payloads come from arbitrary servers, so nothing here is strict:
//! a missing or oddly-typed field simply reads as absent.

use serde_json::Value;

/// The well-known audience URI for public posts.
pub const PUBLIC_SCOPE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Media type of the attachments the image heuristic looks at.
pub const WEBP_MEDIA_TYPE: &str = "image/webp";

/// Fields of a `Create`-style activity consumed by the classifier.
#[derive(Debug, Clone, Default)]
pub struct FederationMessage<'a> {
    /// Activity `type`.
    pub kind: Option<&'a str>,
    /// First entry of `object.to`. A bare string is not a list and reads as absent.
    pub primary_audience: Option<&'a str>,
    /// Number of entries in the activity's `cc`.
    pub cc_count: usize,
    /// Raw HTML of `object.content`.
    pub content: &'a str,
    /// Language keys of `object.contentMap`.
    pub content_languages: Vec<&'a str>,
    /// `object.attachment` entries. A bare object is not a list and reads as empty.
    pub attachments: Vec<Attachment<'a>>,
    /// `object.attributedTo`.
    pub attributed_to: Option<&'a str>,
    /// `object.url`.
    pub url: Option<&'a str>,
    /// `object.atomUri`.
    pub atom_uri: Option<&'a str>,
}

/// A media descriptor from `object.attachment`.
#[derive(Debug, Clone, Default)]
pub struct Attachment<'a> {
    /// `mediaType`, e.g. `image/webp`.
    pub media_type: Option<&'a str>,
    /// `width` as sent; usually a number.
    pub width: Option<&'a Value>,
    /// `height` as sent; usually a number.
    pub height: Option<&'a Value>,
    /// `blurhash` as sent; usually a string.
    pub blurhash: Option<&'a Value>,
}

impl Attachment<'_> {
    fn from_json(json: &Value) -> Attachment<'_> {
        Attachment {
            media_type: json.get("mediaType").and_then(Value::as_str),
            width: json.get("width"),
            height: json.get("height"),
            blurhash: json.get("blurhash"),
        }
    }

    /// `"<width>x<height> <blurhash>"`, with `null` for missing parts.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!(
            "{}x{} {}",
            render(self.width),
            render(self.height),
            render(self.blurhash)
        )
    }

    /// Whether this attachment is a webp image.
    #[must_use]
    pub fn is_webp(&self) -> bool {
        self.media_type == Some(WEBP_MEDIA_TYPE)
    }
}

impl<'a> FederationMessage<'a> {
    /// Build the view from a parsed request body. Never fails.
    #[must_use]
    pub fn from_json(json: &'a Value) -> Self {
        let object = json.get("object").filter(|o| o.is_object());
        let field = |name: &str| object.and_then(|o| o.get(name));

        let primary_audience = field("to")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(Value::as_str);

        let cc_count = match json.get("cc") {
            Some(Value::Array(items)) => items.len(),
            Some(Value::String(_)) => 1,
            _ => 0,
        };

        let content_languages = field("contentMap")
            .and_then(Value::as_object)
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default();

        let attachments = field("attachment")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Attachment::from_json).collect())
            .unwrap_or_default();

        Self {
            kind: json.get("type").and_then(Value::as_str),
            primary_audience,
            cc_count,
            content: field("content").and_then(Value::as_str).unwrap_or_default(),
            content_languages,
            attachments,
            attributed_to: field("attributedTo")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty()),
            url: field("url").and_then(Value::as_str),
            atom_uri: field("atomUri").and_then(Value::as_str),
        }
    }

    /// Whether the activity is a `Create`.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.kind == Some("Create")
    }

    /// Whether the first `to` entry is the public scope.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.primary_audience == Some(PUBLIC_SCOPE)
    }

    /// Whether `contentMap` declares Japanese, or declares nothing.
    #[must_use]
    pub fn is_japanese_or_unlocalized(&self) -> bool {
        self.content_languages.is_empty() || self.content_languages.contains(&"ja")
    }

    /// The actor's local username: everything after the final `/` of `attributedTo`.
    #[must_use]
    pub fn username(&self) -> Option<&'a str> {
        self.attributed_to
            .and_then(|url| url.rsplit('/').next())
    }

    /// Fingerprint of the sole attachment when it is a webp image.
    #[must_use]
    pub fn single_webp_fingerprint(&self) -> Option<String> {
        match self.attachments.as_slice() {
            [only] if only.is_webp() => Some(only.fingerprint()),
            _ => None,
        }
    }

    /// The URL used to identify the post in logs and alerts.
    #[must_use]
    pub fn display_url(&self) -> Option<&'a str> {
        self.url.or(self.atom_uri)
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}
