use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// The closed set of styles the detector is allowed to answer with.
/// Anything the model returns outside this set is treated as an
/// unacceptable attempt, never passed through to the caller.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StyleLabel {
    Western,
    Ethnic,
    Casual,
    Formal,
    Sporty,
    Streetwear,
}

impl StyleLabel {
    /// Maps raw model output onto the label set. Answers like
    /// "Western." or " casual\n" are accepted after normalization.
    pub fn from_model_output(raw: &str) -> Option<Self> {
        raw.trim().trim_end_matches('.').parse().ok()
    }

    pub(crate) fn choices() -> String {
        StyleLabel::iter()
            .map(|label| label.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Client profile sent along with the outfit photo. Field names and
/// defaults mirror the upload form.
#[derive(Serialize, Clone, Debug)]
pub struct StyleParams {
    pub occasion: String,
    pub season: String,
    pub gender: String,
    pub body_type: String,
    pub age: String,
    pub mood: String,
}

impl Default for StyleParams {
    fn default() -> Self {
        StyleParams {
            occasion: "Casual".to_string(),
            season: "Any".to_string(),
            gender: "Woman".to_string(),
            body_type: "Average".to_string(),
            age: "20s".to_string(),
            mood: "Confident".to_string(),
        }
    }
}

pub(crate) const DETECT_SYSTEM: &str =
    "You classify outfit photos. Answer with a single word and nothing else.";

pub(crate) const SUGGEST_SYSTEM: &str = "You are a highly intelligent fashion assistant. \
    Always return a single, perfectly formatted suggestion. Be visual and stylish.";

pub(crate) fn detect_prompt() -> String {
    format!(
        "Which of the following styles best matches the outfit in this photo? \
         Answer with exactly one of: {}.",
        StyleLabel::choices()
    )
}

pub(crate) fn suggest_prompt(params: &StyleParams) -> String {
    format!(
        "You are a world-class stylist. Generate one refined fashion look for this client, \
         taking the attached photo into account.\n\
         \n\
         Client profile:\n\
         - Gender: {}\n\
         - Age: {}\n\
         - Body type: {}\n\
         - Occasion: {}\n\
         - Season: {}\n\
         - Mood: {}\n\
         \n\
         Return a short titled look, then a breakdown covering top, bottom, shoes, layers \
         and accessories, and close with a one-line fit tip for this body type.",
        params.gender, params.age, params.body_type, params.occasion, params.season, params.mood
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_labels_regardless_of_case_and_padding() {
        assert_eq!(
            StyleLabel::from_model_output(" Western.\n"),
            Some(StyleLabel::Western)
        );
        assert_eq!(
            StyleLabel::from_model_output("STREETWEAR"),
            Some(StyleLabel::Streetwear)
        );
        assert_eq!(
            StyleLabel::from_model_output("casual"),
            Some(StyleLabel::Casual)
        );
    }

    #[test]
    fn rejects_anything_outside_the_label_set() {
        assert_eq!(StyleLabel::from_model_output("unknown fabric"), None);
        assert_eq!(StyleLabel::from_model_output(""), None);
        assert_eq!(StyleLabel::from_model_output("western attire"), None);
    }

    #[test]
    fn labels_serialize_lowercase() {
        let json = serde_json::to_value(StyleLabel::Western).unwrap();
        assert_eq!(json, serde_json::json!("western"));
    }

    #[test]
    fn detect_prompt_offers_every_label() {
        let prompt = detect_prompt();
        for label in StyleLabel::iter() {
            assert!(prompt.contains(&label.to_string()));
        }
    }

    #[test]
    fn default_params_match_the_upload_form() {
        let params = StyleParams::default();
        assert_eq!(params.occasion, "Casual");
        assert_eq!(params.season, "Any");
        assert_eq!(params.age, "20s");
    }
}
