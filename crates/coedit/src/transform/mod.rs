//! Whole-text rewrites delegated to an external text service.
//!
//! The service itself sits behind [`TextTransform`]; [`TextTransformer`]
//! builds the prompt, rejects empty input and empty answers, and labels
//! every failure with the operation that was attempted.

mod history;

pub use history::{EditHistory, HistoryEntry};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::{CoeditError, CoeditResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Formal,
    Casual,
    Professional,
    Friendly,
    Academic,
}

impl Tone {
    pub const ALL: [Tone; 5] = [
        Tone::Formal,
        Tone::Casual,
        Tone::Professional,
        Tone::Friendly,
        Tone::Academic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Formal => "formal",
            Tone::Casual => "casual",
            Tone::Professional => "professional",
            Tone::Friendly => "friendly",
            Tone::Academic => "academic",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tone {
    type Err = CoeditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Tone::ALL
            .into_iter()
            .find(|tone| tone.as_str() == wanted)
            .ok_or_else(|| CoeditError::validation(format!("unknown tone: {}", s)))
    }
}

/// A rewrite the text service can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "operation", content = "tone", rename_all = "snake_case")]
pub enum TransformOperation {
    GrammarFix,
    ToneChange(Tone),
    MakeConcise,
    Expand,
    FixPunctuation,
    Simplify,
    MakeProfessional,
    /// Advice about the text rather than a replacement for it
    Suggestions,
    /// Commentary on clarity, tone and structure
    Analyze,
}

impl TransformOperation {
    /// Stable machine name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GrammarFix => "grammar_fix",
            Self::ToneChange(_) => "tone_change",
            Self::MakeConcise => "make_concise",
            Self::Expand => "expand",
            Self::FixPunctuation => "fix_punctuation",
            Self::Simplify => "simplify",
            Self::MakeProfessional => "make_professional",
            Self::Suggestions => "suggestions",
            Self::Analyze => "analyze",
        }
    }

    /// Human-readable label used in edit histories
    pub fn label(&self) -> String {
        match self {
            Self::GrammarFix => "Grammar fixed".to_string(),
            Self::ToneChange(tone) => format!("Tone changed to {}", tone),
            Self::MakeConcise => "Made concise".to_string(),
            Self::Expand => "Expanded".to_string(),
            Self::FixPunctuation => "Punctuation fixed".to_string(),
            Self::Simplify => "Simplified".to_string(),
            Self::MakeProfessional => "Made professional".to_string(),
            Self::Suggestions => "Suggestions".to_string(),
            Self::Analyze => "Analysis".to_string(),
        }
    }

    /// Whether the result is meant to replace the input text
    pub fn rewrites(&self) -> bool {
        !matches!(self, Self::Suggestions | Self::Analyze)
    }

    /// The instruction sent to the text service
    pub fn prompt(&self, text: &str) -> String {
        let instruction = match self {
            Self::GrammarFix => {
                "Fix grammar and spelling errors in this text. Return only the corrected text:"
                    .to_string()
            }
            Self::ToneChange(tone) => format!(
                "Rewrite this text in a {} tone. Return only the rewritten text:",
                tone
            ),
            Self::MakeConcise => "Make this text concise and clear. Remove unnecessary words. \
                 Return only the concise text:"
                .to_string(),
            Self::Expand => {
                "Expand this text with more details and examples. Return only the expanded text:"
                    .to_string()
            }
            Self::FixPunctuation => "Fix punctuation, capitalization and formatting in this \
                 text. Return only the fixed text:"
                .to_string(),
            Self::Simplify => "Simplify this text for a general audience. Use simpler words \
                 and shorter sentences. Return only the simplified text:"
                .to_string(),
            Self::MakeProfessional => "Make this text more professional and suitable for \
                 business communication. Return only the professional text:"
                .to_string(),
            Self::Suggestions => {
                "Provide 3-5 specific suggestions to improve this text:".to_string()
            }
            Self::Analyze => {
                "Analyze this text for clarity, tone, structure and any issues:".to_string()
            }
        };
        format!("{}\n\n\"{}\"", instruction, text)
    }
}

impl fmt::Display for TransformOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An external service that answers a prompt with text
pub trait TextTransform: Send + Sync {
    fn complete(&self, prompt: String) -> impl Future<Output = CoeditResult<String>> + Send;
}

/// Runs [`TransformOperation`]s against a [`TextTransform`] backend
///
/// Failures are reported once; nothing is retried.
pub struct TextTransformer<T> {
    backend: T,
}

impl<T: TextTransform> TextTransformer<T> {
    pub fn new(backend: T) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub async fn transform(&self, text: &str, operation: TransformOperation) -> CoeditResult<String> {
        if text.trim().is_empty() {
            return Err(CoeditError::validation("text to transform must not be empty"));
        }

        debug!("Running {} on {} characters", operation, text.chars().count());
        let output = self
            .backend
            .complete(operation.prompt(text))
            .await
            .map_err(|e| {
                warn!("Text service failed during {}: {}", operation, e);
                CoeditError::Transform {
                    operation: operation.name().to_string(),
                    message: e.to_string(),
                }
            })?;

        let output = output.trim();
        if output.is_empty() {
            return Err(CoeditError::Transform {
                operation: operation.name().to_string(),
                message: "text service returned an empty response".to_string(),
            });
        }
        Ok(output.to_string())
    }
}
