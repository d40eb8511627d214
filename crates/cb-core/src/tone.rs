//! Coach tones and per-user tone selection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    domain::UserId,
    errors::Error,
    policy::Tier,
    store::port::PreferenceStore,
    Result,
};

const BASE_RULES: &str = "ABSOLUTE RULES:
1. MAXIMUM 35 WORDS per response.
2. NEVER use bullet points or numbered lists.
3. ONE question per response.
4. Write like texting a friend, not like a coach or therapist.

RESPONSE FORMULA: [empathy phrase] + [one specific question].";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Focused,
    #[default]
    Baddy,
    Mentor,
}

impl Tone {
    pub const ALL: [Tone; 3] = [Tone::Focused, Tone::Baddy, Tone::Mentor];

    /// Strict parse; unknown names are rejected rather than mapped to the default.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "focused" => Ok(Tone::Focused),
            "baddy" => Ok(Tone::Baddy),
            "mentor" => Ok(Tone::Mentor),
            other => Err(Error::invalid("tone", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Focused => "focused",
            Tone::Baddy => "baddy",
            Tone::Mentor => "mentor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tone::Focused => "Focused",
            Tone::Baddy => "Baddy",
            Tone::Mentor => "Mentor",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Tone::Focused => "Fewest words, most action",
            Tone::Baddy => "Like a friend who won't let you lie to yourself",
            Tone::Mentor => "Polite and structured, like a business coach",
        }
    }

    pub fn is_available_for(self, tier: Tier) -> bool {
        match self {
            Tone::Focused | Tone::Baddy => true,
            Tone::Mentor => tier == Tier::Premium,
        }
    }

    pub fn system_prompt(self) -> String {
        let persona = match self {
            Tone::Focused => {
                "You are a blunt accountability coach. Skip pleasantries, \
                 name the next concrete action and ask when it will happen."
            }
            Tone::Baddy => {
                "You are a supportive accountability buddy. Be warm and casual, \
                 but call out excuses the way a close friend would."
            }
            Tone::Mentor => {
                "You are a calm business mentor. Be polite and structured, \
                 and steer the user toward clear goals and measurable progress."
            }
        };
        format!("{BASE_RULES}\n\n{persona}")
    }
}

/// Outcome of a tone change request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneSelection {
    Applied(Tone),
    /// The tone needs a premium subscription; nothing was written.
    RequiresPremium(Tone),
}

pub struct ToneService {
    prefs: Arc<dyn PreferenceStore>,
}

impl ToneService {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    pub async fn current(&self, user: UserId) -> Result<Tone> {
        Ok(self.prefs.get_tone(user).await?.unwrap_or_default())
    }

    pub async fn select(&self, user: UserId, tone: Tone, tier: Tier) -> Result<ToneSelection> {
        if !tone.is_available_for(tier) {
            tracing::info!(user = %user, tone = tone.as_str(), "tone requires premium");
            return Ok(ToneSelection::RequiresPremium(tone));
        }
        self.prefs.set_tone(user, tone).await?;
        tracing::info!(user = %user, tone = tone.as_str(), "tone updated");
        Ok(ToneSelection::Applied(tone))
    }
}
