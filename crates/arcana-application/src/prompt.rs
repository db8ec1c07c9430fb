//! Prompt assembly for paid readings.
//!
//! Each reading kind carries its own input shape; this module turns that
//! plus the seeker's profile into the request the generation API takes.

use arcana_core::account::{Account, ZodiacSign};
use arcana_core::artifact::ReadingKind;
use arcana_core::generation::GenerationRequest;

/// Kind-specific input to a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingInput {
    Tarot {
        card_names: Vec<String>,
        question: Option<String>,
    },
    Coffee {
        /// Uploaded cup-photo references.
        image_refs: Vec<String>,
    },
    Palm {
        image_ref: String,
    },
    Dream {
        dream_text: String,
    },
    DailyHoroscope,
    LoveCompatibility {
        partner_sign: ZodiacSign,
    },
}

impl ReadingInput {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::Tarot { .. } => ReadingKind::Tarot,
            Self::Coffee { .. } => ReadingKind::Coffee,
            Self::Palm { .. } => ReadingKind::Palm,
            Self::Dream { .. } => ReadingKind::Dream,
            Self::DailyHoroscope => ReadingKind::DailyHoroscope,
            Self::LoveCompatibility { .. } => ReadingKind::LoveCompatibility,
        }
    }

    /// Input references persisted on the artifact.
    pub fn input_refs(&self) -> Vec<String> {
        match self {
            Self::Tarot { card_names, .. } => card_names.clone(),
            Self::Coffee { image_refs } => image_refs.clone(),
            Self::Palm { image_ref } => vec![image_ref.clone()],
            Self::Dream { dream_text } => vec![dream_text.clone()],
            Self::DailyHoroscope => Vec::new(),
            Self::LoveCompatibility { partner_sign } => vec![partner_sign.as_str().to_string()],
        }
    }
}

/// Builds the full generation request for a reading.
pub fn build_request(model: &str, account: &Account, input: &ReadingInput) -> GenerationRequest {
    GenerationRequest {
        model: model.to_string(),
        system_prompt: system_prompt(input.kind()),
        user_prompt: user_prompt(account, input),
    }
}

fn system_prompt(kind: ReadingKind) -> String {
    let specialty = match kind {
        ReadingKind::Tarot => "tarot card interpretation",
        ReadingKind::Coffee => "Turkish coffee cup reading",
        ReadingKind::Palm => "palmistry",
        ReadingKind::Dream => "dream interpretation",
        ReadingKind::DailyHoroscope => "daily horoscopes",
        ReadingKind::LoveCompatibility => "zodiac love compatibility",
    };
    format!(
        "You are Arcana, a warm and insightful fortune teller specialising in {specialty}. \
         Speak directly to the seeker in the second person. Be specific and evocative, \
         never generic, and close with one piece of gentle guidance. \
         Keep the reading to three or four short paragraphs."
    )
}

fn user_prompt(account: &Account, input: &ReadingInput) -> String {
    let mut lines = vec![format!("Seeker: {}", account.name)];
    if let Some(sign) = account.zodiac_sign {
        lines.push(format!("Zodiac sign: {}", sign.as_str()));
    }
    if let Some(age) = account.age {
        lines.push(format!("Age: {age}"));
    }

    match input {
        ReadingInput::Tarot {
            card_names,
            question,
        } => {
            lines.push(format!("Cards drawn: {}", card_names.join(", ")));
            if let Some(question) = question {
                lines.push(format!("Question: {question}"));
            }
            lines.push("Interpret this spread for the seeker.".to_string());
        }
        ReadingInput::Coffee { image_refs } => {
            lines.push(format!("Cup photos provided: {}", image_refs.len()));
            lines.push(
                "Read the shapes and symbols left in the coffee grounds.".to_string(),
            );
        }
        ReadingInput::Palm { .. } => {
            lines.push(
                "Read the seeker's palm: life line, head line, heart line and fate line."
                    .to_string(),
            );
        }
        ReadingInput::Dream { dream_text } => {
            lines.push(format!("The seeker dreamed: {dream_text}"));
            lines.push("Interpret the dream's symbols and meaning.".to_string());
        }
        ReadingInput::DailyHoroscope => {
            lines.push("Write today's horoscope for the seeker.".to_string());
        }
        ReadingInput::LoveCompatibility { partner_sign } => {
            lines.push(format!("Partner's zodiac sign: {}", partner_sign.as_str()));
            lines.push(
                "Describe the romantic compatibility between the two signs.".to_string(),
            );
        }
    }

    lines.join("\n")
}
