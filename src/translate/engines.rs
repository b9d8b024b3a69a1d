//! Translation backends. Each engine either returns fully translated text or
//! an error; the chain in `translate::Translator` decides what happens next.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait TranslateEngine: Send + Sync {
    fn name(&self) -> &'static str;
    async fn translate(&self, text: &str) -> Result<String>;
}

fn engine_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("newswire-relay/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client")
}

// ------------------------------------------------------------
// OpenAI chat completions
// ------------------------------------------------------------

pub struct OpenAiEngine {
    http: reqwest::Client,
    api_key: String,
    model: String,
    source_lang: String,
    target_lang: String,
}

impl OpenAiEngine {
    pub fn new(api_key: &str, model: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            http: engine_http_client(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

#[async_trait]
impl TranslateEngine for OpenAiEngine {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn translate(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You are a precise translator. Translate ONLY natural language segments \
                   into the target language. STRICTLY preserve as-is: emojis, URLs (https://...), \
                   emails, @mentions, #hashtags, $tickers, any placeholders like [EMOJI_0] or \
                   [URL_1] with exact casing and brackets, code blocks, and original line breaks. \
                   Do not add extra text. Output only the translation.";
        let user = format!(
            "Source language: {}\nTarget language: {}\n\nText:\n{}",
            self.source_lang, self.target_lang, text
        );
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.0,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("openai request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("openai returned {status}");
        }
        let body: Resp = resp.json().await.context("openai response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            bail!("openai returned an empty translation");
        }
        Ok(content)
    }
}

// ------------------------------------------------------------
// MyMemory (keyless, hard request-length limit)
// ------------------------------------------------------------

pub struct MyMemoryEngine {
    http: reqwest::Client,
    source_lang: String,
    target_lang: String,
    chunk_limit: usize,
}

impl MyMemoryEngine {
    pub fn new(source_lang: &str, target_lang: &str, chunk_limit: usize) -> Self {
        Self {
            http: engine_http_client(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            chunk_limit,
        }
    }

    async fn translate_part(&self, text: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Resp {
            #[serde(rename = "responseData")]
            response_data: RespData,
        }
        #[derive(Deserialize)]
        struct RespData {
            #[serde(rename = "translatedText")]
            translated_text: String,
        }

        let langpair = format!("{}|{}", self.source_lang, self.target_lang);
        let resp = self
            .http
            .get("https://api.mymemory.translated.net/get")
            .query(&[("q", text), ("langpair", langpair.as_str())])
            .send()
            .await
            .context("mymemory request")?
            .error_for_status()
            .context("mymemory status")?;
        let body: Resp = resp.json().await.context("mymemory response body")?;
        let out = body.response_data.translated_text;
        // The free tier reports exhaustion inside the translated text itself.
        if out.to_uppercase().contains("MYMEMORY WARNING") {
            bail!("mymemory usage limit reached");
        }
        Ok(out)
    }
}

#[async_trait]
impl TranslateEngine for MyMemoryEngine {
    fn name(&self) -> &'static str {
        "mymemory"
    }

    async fn translate(&self, text: &str) -> Result<String> {
        if text.chars().count() <= self.chunk_limit {
            return self.translate_part(text).await;
        }
        let chunks = chunk_sentences(text, self.chunk_limit);
        // A single sentence past the limit cannot be split at a sentence
        // boundary; hand the text to the next engine instead of cutting it.
        if let Some(oversized) = chunks.iter().find(|c| c.chars().count() > self.chunk_limit) {
            bail!(
                "sentence of {} chars exceeds the {}-char request limit",
                oversized.chars().count(),
                self.chunk_limit
            );
        }
        tracing::debug!(chunks = chunks.len(), "long text split for mymemory");
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            parts.push(self.translate_part(chunk).await?);
        }
        Ok(parts.concat())
    }
}

// ------------------------------------------------------------
// Microsoft Translator
// ------------------------------------------------------------

pub struct MicrosoftEngine {
    http: reqwest::Client,
    key: String,
    region: String,
    source_lang: String,
    target_lang: String,
}

impl MicrosoftEngine {
    pub fn new(key: &str, region: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            http: engine_http_client(),
            key: key.to_string(),
            region: region.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

#[async_trait]
impl TranslateEngine for MicrosoftEngine {
    fn name(&self) -> &'static str {
        "microsoft"
    }

    async fn translate(&self, text: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Req<'a> {
            text: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            translations: Vec<Translation>,
        }
        #[derive(Deserialize)]
        struct Translation {
            text: String,
        }

        let url = format!(
            "https://api.cognitive.microsofttranslator.com/translate?api-version=3.0&from={}&to={}",
            self.source_lang, self.target_lang
        );
        let resp = self
            .http
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Ocp-Apim-Subscription-Region", &self.region)
            .json(&[Req { text }])
            .send()
            .await
            .context("microsoft request")?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            bail!("microsoft usage limit exceeded");
        }
        let body: Vec<Resp> = resp
            .error_for_status()
            .context("microsoft status")?
            .json()
            .await
            .context("microsoft response body")?;
        body.first()
            .and_then(|r| r.translations.first())
            .map(|t| t.text.clone())
            .ok_or_else(|| anyhow!("microsoft response carried no translation"))
    }
}

// ------------------------------------------------------------
// DeepL
// ------------------------------------------------------------

pub struct DeepLEngine {
    http: reqwest::Client,
    api_key: String,
    target_lang: String,
}

impl DeepLEngine {
    pub fn new(api_key: &str, target_lang: &str) -> Self {
        Self {
            http: engine_http_client(),
            api_key: api_key.to_string(),
            target_lang: target_lang.to_uppercase(),
        }
    }
}

#[async_trait]
impl TranslateEngine for DeepLEngine {
    fn name(&self) -> &'static str {
        "deepl"
    }

    async fn translate(&self, text: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Resp {
            translations: Vec<Translation>,
        }
        #[derive(Deserialize)]
        struct Translation {
            text: String,
        }

        let resp = self
            .http
            .post("https://api-free.deepl.com/v2/translate")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.api_key),
            )
            .form(&[("text", text), ("target_lang", self.target_lang.as_str())])
            .send()
            .await
            .context("deepl request")?;
        // 456 is DeepL's out-of-quota status.
        if resp.status().as_u16() == 456 {
            bail!("deepl quota exceeded");
        }
        let body: Resp = resp
            .error_for_status()
            .context("deepl status")?
            .json()
            .await
            .context("deepl response body")?;
        body.translations
            .first()
            .map(|t| t.text.clone())
            .ok_or_else(|| anyhow!("deepl response carried no translation"))
    }
}

// ------------------------------------------------------------
// Sentence-bounded chunking
// ------------------------------------------------------------

/// Splits on sentence-terminal punctuation, trimming each sentence. The tail
/// without a terminator still comes back as a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

/// Greedy sentence packing: each chunk stays within `limit` chars unless a
/// single sentence alone exceeds it, in which case that sentence becomes its
/// own chunk rather than being cut mid-sentence.
pub fn chunk_sentences(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(text) {
        if current.chars().count() + sentence.chars().count() <= limit {
            current.push_str(&sentence);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current = sentence;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
