use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::config::SentimentSettings;

/// The three sentiment buckets the rest of the system understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentimentCategory {
    Positive,
    Negative,
    Neutral,
}

impl SentimentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentCategory::Positive => "positive",
            SentimentCategory::Negative => "negative",
            SentimentCategory::Neutral => "neutral",
        }
    }

    /// Parse a stored or upstream tag. Unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" => Some(SentimentCategory::Positive),
            "negative" => Some(SentimentCategory::Negative),
            "neutral" => Some(SentimentCategory::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SentimentCategory {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SentimentCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        SentimentCategory::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown sentiment: {value}")))
    }
}

/// Classifier verdict attached to feedback and chat text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub category: SentimentCategory,
    pub score: f64,
}

impl Sentiment {
    pub const NEUTRAL: Sentiment = Sentiment {
        category: SentimentCategory::Neutral,
        score: 0.0,
    };
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    category: Option<String>,
}

/// HTTP client for the external sentiment-analysis service.
#[derive(Clone)]
pub struct SentimentClient {
    http: Client,
    analyze_url: String,
    library: String,
}

impl SentimentClient {
    pub fn new(settings: &SentimentSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("failed to build sentiment HTTP client")?;

        Ok(Self {
            http,
            analyze_url: format!("{}/analyze", settings.base_url.trim_end_matches('/')),
            library: settings.library.clone(),
        })
    }

    /// Classify with the configured library. Never fails: any upstream problem
    /// yields [`Sentiment::NEUTRAL`].
    pub async fn classify(&self, text: &str) -> Sentiment {
        self.classify_with(text, &self.library).await
    }

    pub async fn classify_with(&self, text: &str, library: &str) -> Sentiment {
        match self.try_classify(text, library).await {
            Ok(sentiment) => sentiment,
            Err(err) => {
                warn!(?err, library, "sentiment analysis failed, falling back to neutral");
                Sentiment::NEUTRAL
            }
        }
    }

    /// Single attempt against the service, no retries.
    pub async fn try_classify(&self, text: &str, library: &str) -> Result<Sentiment> {
        let response = self
            .http
            .post(&self.analyze_url)
            .query(&[("library", library)])
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .context("sentiment service unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("sentiment service returned {status}: {}", preview(&body));
        }

        let payload: AnalyzeResponse = response
            .json()
            .await
            .context("failed to decode sentiment service response")?;

        let score = payload
            .score
            .filter(|score| score.is_finite())
            .ok_or_else(|| anyhow!("sentiment response is missing a numeric score"))?;

        let category = match payload.category.as_deref().map(SentimentCategory::parse) {
            Some(Some(category)) => category,
            Some(None) | None => {
                warn!(
                    category = ?payload.category,
                    "sentiment service returned an unknown category, treating as neutral"
                );
                SentimentCategory::Neutral
            }
        };

        Ok(Sentiment { category, score })
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > 200 {
        let cut: String = body.chars().take(200).collect();
        format!("{cut}...")
    } else {
        body.to_string()
    }
}
