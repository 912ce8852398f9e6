//! Record types and manifest-visible transforms.

use exodus_core::{JsonCodec, TransformError};
use exodus_server::engine::Registrar;
use serde::{Deserialize, Serialize};

/// Customer feedback submitted to `POST /feedback`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Feedback {
    pub customer_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category: String,
    pub is_negative: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

const POSITIVE_WORDS: [&str; 3] = ["love", "great", "happy"];

pub fn register(r: &mut Registrar) {
    r.record_type::<Feedback, _>("feedback.v1", JsonCodec)
        .transform::<Feedback, _>("feedback.v1", "sentiment", sentiment)
        .transform::<Feedback, _>("feedback.v1", "tagger", tagger)
        .transform::<Feedback, _>("feedback.v1", "audit-only", audit_only);
}

fn sentiment(mut f: Feedback) -> Result<Feedback, TransformError> {
    let content = f.content.to_lowercase();
    let tag = if POSITIVE_WORDS.iter().any(|w| content.contains(w)) {
        "Positive Sentiment"
    } else {
        "Needs Attention"
    };
    f.tags.push(tag.to_string());
    Ok(f)
}

fn tagger(mut f: Feedback) -> Result<Feedback, TransformError> {
    if f.is_negative {
        f.tags.push("neg".to_string());
    }
    Ok(f)
}

fn audit_only(f: Feedback) -> Result<Feedback, TransformError> {
    Ok(f)
}
