//! Novelty dating profiles and the ways to generate them.

use crate::{config, llm::LlmChatRequest, log_error, log_internal, store::Store};
use anyhow::Result;
use rand::seq::{IteratorRandom, SliceRandom};
use regex::Regex;
use serde_json::{Map, Value};
use serenity::all::UserId;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

/// Placeholder for a field that is missing or blank
pub const SENTINEL: &str = "N/A";

/// Required keys, in display order
pub const FIELDS: [&str; 9] = [
    "name",
    "dating_me_like",
    "way_to_heart",
    "known_for",
    "spontaneous_thing",
    "geek_out_on",
    "age",
    "job",
    "funny_fact",
];

/// Cached profiles by member
pub type Profiles = HashMap<UserId, Profile>;

/// Every field is always present and non-empty.  Deserializing from loosely shaped JSON (old
/// caches, LLM output) fills the gaps with [`SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct Profile {
    pub name: String,
    pub dating_me_like: String,
    pub way_to_heart: String,
    pub known_for: String,
    pub spontaneous_thing: String,
    pub geek_out_on: String,
    pub age: String,
    pub job: String,
    pub funny_fact: String,
}

impl From<Map<String, Value>> for Profile {
    fn from(map: Map<String, Value>) -> Self {
        let field = |key: &str| {
            let value = match map.get(key) {
                Some(Value::String(s)) => s.trim().to_owned(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => String::new(),
            };
            if value.is_empty() {
                SENTINEL.to_owned()
            } else {
                value
            }
        };

        Self {
            name: field("name"),
            dating_me_like: field("dating_me_like"),
            way_to_heart: field("way_to_heart"),
            known_for: field("known_for"),
            spontaneous_thing: field("spontaneous_thing"),
            geek_out_on: field("geek_out_on"),
            age: field("age"),
            job: field("job"),
            funny_fact: field("funny_fact"),
        }
    }
}

impl Profile {
    /// `(key, value)` in display order
    pub fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("name", &self.name),
            ("dating_me_like", &self.dating_me_like),
            ("way_to_heart", &self.way_to_heart),
            ("known_for", &self.known_for),
            ("spontaneous_thing", &self.spontaneous_thing),
            ("geek_out_on", &self.geek_out_on),
            ("age", &self.age),
            ("job", &self.job),
            ("funny_fact", &self.funny_fact),
        ]
    }

    /// Number of fields that fell back to [`SENTINEL`]
    pub fn sentinel_count(&self) -> usize {
        self.fields()
            .iter()
            .filter(|(_, value)| *value == SENTINEL)
            .count()
    }
}

impl Store<Profiles> {
    /// Cache a freshly generated profile for `member`.
    pub async fn put(&mut self, member: UserId, profile: Profile) -> Result<()> {
        let previous = self.table_mut().insert(member, profile);
        if let Err(e) = self.save().await {
            match previous {
                Some(previous) => self.table_mut().insert(member, previous),
                None => self.table_mut().remove(&member),
            };
            return Err(e);
        }
        log_internal!("Cached profile for {}", member);
        Ok(())
    }

    /// Forget `member`'s profile so the next request generates a new one.  `false` if there
    /// was nothing to forget.
    pub async fn reset(&mut self, member: UserId) -> Result<bool> {
        let Some(previous) = self.table_mut().remove(&member) else {
            return Ok(false);
        };
        if let Err(e) = self.save().await {
            self.table_mut().insert(member, previous);
            return Err(e);
        }
        log_internal!("Reset profile for {}", member);
        Ok(true)
    }
}

/// Up to `n` random profiles other than `exclude`'s own
pub fn sample_matches<'a>(
    profiles: &'a Profiles,
    exclude: UserId,
    n: usize,
    rng: &mut impl rand::Rng,
) -> Vec<(UserId, &'a Profile)> {
    profiles
        .iter()
        .filter(|(member, _)| **member != exclude)
        .map(|(member, profile)| (*member, profile))
        .choose_multiple(rng, n)
}

/// Embed field title for a profile key
pub fn field_title(key: &str) -> &'static str {
    match key {
        "name" => "\u{1F516} Name",
        "dating_me_like" => "\u{1F4A1} Dating me is like",
        "way_to_heart" => "\u{2728} The way to my heart is",
        "known_for" => "\u{1F3C6} I'm known for",
        "spontaneous_thing" => "\u{1F680} Most spontaneous thing I've done",
        "geek_out_on" => "\u{1F3AE} I geek out on",
        "age" => "\u{1F382} Age",
        "job" => "\u{1F4BC} Job",
        "funny_fact" => "\u{1F602} A funny fact about me",
        _ => "Other",
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum GenerationError {
    #[display("Profile request failed: {}", source)]
    Request { source: reqwest::Error },
    #[display("Profile API answered with status {}", status)]
    Status {
        #[error(not(source))]
        status: reqwest::StatusCode,
    },
    #[display("Profile API reply has no `{}`", field)]
    MissingField { field: &'static str },
    #[display("Profile API reply has no fenced code block")]
    NoFencedBlock,
    #[display("Profile API reply is not a JSON object: {}", reason)]
    InvalidJson { reason: String },
    #[display("Profile generator misconfigured: {}", reason)]
    Misconfigured { reason: String },
}

impl From<reqwest::Error> for GenerationError {
    fn from(source: reqwest::Error) -> Self {
        GenerationError::Request { source }
    }
}

/// Something that can write a profile for a display name
#[serenity::async_trait]
pub trait ProfileTextSource: Send + Sync {
    async fn generate(&self, name: &str) -> Result<Profile, GenerationError>;
}

/// Pick the configured generator
pub fn source_from_config(
    cfg: &config::ProfileGenerator,
) -> Result<Arc<dyn ProfileTextSource>, GenerationError> {
    Ok(match cfg.source {
        config::ProfileSource::Phrases => Arc::new(PhrasePool),
        config::ProfileSource::Llm => Arc::new(LlmProfileSource::new(cfg)?),
    })
}

/// Pull the JSON object out of the first fenced code block in `text`.
pub fn extract_fenced_json(text: &str) -> Result<Map<String, Value>, GenerationError> {
    static FENCED: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json)?\s*\n(.+?)\n\s*```").expect("fenced block regex is valid")
    });

    let body = FENCED
        .captures(text)
        .and_then(|captures| captures.get(1))
        .ok_or(GenerationError::NoFencedBlock)?
        .as_str();

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(GenerationError::InvalidJson {
            reason: format!("expected an object, found {}", other),
        }),
        Err(e) => Err(GenerationError::InvalidJson {
            reason: e.to_string(),
        }),
    }
}

/// Profiles assembled from canned phrases.  Never fails.
pub struct PhrasePool;

const DATING_ME_LIKE: &[&str] = &[
    "a surprise road trip with no map and too many snacks",
    "a rom-com where the soundtrack is mostly lo-fi beats",
    "a group project where I actually do my part",
    "finding a twenty in last winter's coat",
    "a plot twist you saw coming but enjoy anyway",
];
const WAY_TO_HEART: &[&str] = &[
    "extra cheese on everything",
    "remembering my coffee order",
    "sending memes at 2 AM",
    "letting me pick the playlist",
    "carrying me in ranked",
];
const KNOWN_FOR: &[&str] = &[
    "always being five minutes late with a great excuse",
    "knowing every line of the same three movies",
    "starting hobbies and finishing none of them",
    "an unbeaten karaoke streak",
    "reacting with the perfect emoji",
];
const SPONTANEOUS_THING: &[&str] = &[
    "booked a flight on a dare",
    "adopted a plant and named it Kevin",
    "joined a flash mob halfway through",
    "learned to juggle during a power outage",
    "entered a pie eating contest and placed third",
];
const GEEK_OUT_ON: &[&str] = &[
    "mechanical keyboards",
    "speedrun strategies",
    "obscure space facts",
    "sourdough hydration ratios",
    "fantasy map making",
];
const JOB: &[&str] = &[
    "professional napper",
    "barista by day, DJ by night",
    "freelance dragon tamer",
    "software engineer",
    "underwater basket weaver",
];
const FUNNY_FACT: &[&str] = &[
    "I can't whistle but I can hum in harmony with myself",
    "I once got lost in an IKEA for two hours",
    "my cat has more followers than me",
    "I sneeze every time I see the sun",
    "I have never won a game of Uno",
];

#[serenity::async_trait]
impl ProfileTextSource for PhrasePool {
    async fn generate(&self, name: &str) -> Result<Profile, GenerationError> {
        let mut rng = rand::thread_rng();
        let age = rand::Rng::gen_range(&mut rng, 22..=35).to_string();
        let mut pick = |pool: &[&str]| pool.choose(&mut rng).copied().unwrap_or(SENTINEL).to_owned();

        let name = if name.trim().is_empty() {
            SENTINEL.to_owned()
        } else {
            name.trim().to_owned()
        };

        Ok(Profile {
            name,
            dating_me_like: pick(DATING_ME_LIKE),
            way_to_heart: pick(WAY_TO_HEART),
            known_for: pick(KNOWN_FOR),
            spontaneous_thing: pick(SPONTANEOUS_THING),
            geek_out_on: pick(GEEK_OUT_ON),
            age,
            job: pick(JOB),
            funny_fact: pick(FUNNY_FACT),
        })
    }
}

/// Profiles written by an OpenAI-compatible chat completion endpoint
pub struct LlmProfileSource {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model_name: String,
    temperature: f32,
}

impl LlmProfileSource {
    pub fn new(cfg: &config::ProfileGenerator) -> Result<Self, GenerationError> {
        if !(0.0..=2.0).contains(&cfg.temperature) {
            return Err(GenerationError::Misconfigured {
                reason: format!("temperature {} is outside 0.0..=2.0", cfg.temperature),
            });
        }
        reqwest::Url::parse(&cfg.chat_url).map_err(|e| GenerationError::Misconfigured {
            reason: format!("chat_url `{}`: {}", cfg.chat_url, e),
        })?;
        let client = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            client,
            url: cfg.chat_url.clone(),
            api_key: cfg.api_key.clone(),
            model_name: cfg.model_name.clone(),
            temperature: cfg.temperature,
        })
    }

    fn prompt(name: &str) -> String {
        format!(
            "Create a dating profile for {name} with the following fields:\n\
             - Dating me is like...\n\
             - The way to my heart is...\n\
             - I'm known for...\n\
             - Most spontaneous thing I've done...\n\
             - I geek out on...\n\
             - Age (random between 22-35)\n\
             - Job\n\
             - A funny fact about me...\n\
             Format the response as JSON in a ```json fenced code block with these exact keys: {}.",
            FIELDS.join(", ")
        )
    }
}

#[serenity::async_trait]
impl ProfileTextSource for LlmProfileSource {
    async fn generate(&self, name: &str) -> Result<Profile, GenerationError> {
        let request = LlmChatRequest::single_prompt(&self.model_name, Self::prompt(name), self.temperature);
        let content = request.post(&self.client, &self.url, &self.api_key).await?;

        let fields = extract_fenced_json(&content).inspect_err(|e| {
            log_error!("Unusable profile generated for {}: {}", name, e);
        })?;
        let profile = Profile::from(fields);

        if profile.sentinel_count() > 0 {
            log_error!(
                "Profile generated for {} is missing {} field(s), filled with {}",
                name,
                profile.sentinel_count(),
                SENTINEL
            );
        }
        Ok(profile)
    }
}
