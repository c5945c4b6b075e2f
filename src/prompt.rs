use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Number;
use std::fmt::{self, Write};

const BASE_INSTRUCTIONS: &str = "You are a medical assistant specializing in neurology and brain tumors.
Provide accurate, helpful information about brain conditions and tumors.

Important guidelines:
- Keep responses concise but thorough (about 3 or less paragraphs)
- Use simple language that patients can understand
- Avoid making definitive diagnoses
- Remind users to consult healthcare professionals for medical advice
- For tumor information, mention detection confidence when relevant
";

/// Classification context a client may attach to a chat message.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ChatContext {
    #[serde(default)]
    pub tumor_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<Number>,
    #[serde(default)]
    pub probabilities: Option<ProbabilityBreakdown>,
}

/// Label to percentage pairs, kept in the order the client sent them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityBreakdown(Vec<(String, Number)>);

impl ProbabilityBreakdown {
    pub fn new(entries: Vec<(String, Number)>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Number)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for ProbabilityBreakdown {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BreakdownVisitor;

        impl<'de> Visitor<'de> for BreakdownVisitor {
            type Value = ProbabilityBreakdown;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object mapping labels to numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(4));
                while let Some((label, percent)) = map.next_entry::<String, Number>()? {
                    entries.push((label, percent));
                }
                Ok(ProbabilityBreakdown(entries))
            }
        }

        deserializer.deserialize_map(BreakdownVisitor)
    }
}

impl ChatContext {
    fn tumor_type(&self) -> Option<&str> {
        self.tumor_type.as_deref().filter(|t| !t.is_empty())
    }

    fn probabilities(&self) -> Option<&ProbabilityBreakdown> {
        self.probabilities.as_ref().filter(|p| !p.is_empty())
    }
}

pub fn build_system_prompt(context: Option<&ChatContext>) -> String {
    let mut prompt = String::from(BASE_INSTRUCTIONS);
    let Some(context) = context else {
        return prompt;
    };

    if let Some(tumor_type) = context.tumor_type() {
        let confidence = context
            .confidence
            .as_ref()
            .map(Number::to_string)
            .unwrap_or_else(|| "N/A".into());
        let _ = write!(
            prompt,
            "\n\nCurrent scan analysis: {} detected with {}% confidence.",
            tumor_type, confidence
        );
    }

    if let Some(probabilities) = context.probabilities() {
        prompt.push_str("\n\nProbability breakdown:\n");
        for (label, percent) in probabilities.iter() {
            let _ = writeln!(prompt, "- {}: {}%", label, percent);
        }
    }

    prompt
}
