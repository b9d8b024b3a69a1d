pub mod engines;
pub mod mask;

use metrics::counter;

use crate::config::Settings;
use engines::{DeepLEngine, MicrosoftEngine, MyMemoryEngine, OpenAiEngine, TranslateEngine};

/// What a reader sees when every engine failed. Delivery still happens; the
/// original text is always in the message.
pub const TRANSLATION_UNAVAILABLE: &str = "[translation unavailable: every engine failed]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Translated(String),
    AllFailed,
}

/// Ordered engine chain with protected-span masking around it. First engine
/// to answer wins; an engine failure is a log line, not a cycle abort.
pub struct Translator {
    engines: Vec<Box<dyn TranslateEngine>>,
}

impl Translator {
    pub fn new(engines: Vec<Box<dyn TranslateEngine>>) -> Self {
        Self { engines }
    }

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub async fn translate(&self, text: &str) -> TranslationOutcome {
        let masked = mask::mask(text);
        for engine in &self.engines {
            match engine.translate(&masked.text).await {
                Ok(out) => {
                    counter!("relay_translations_total", "engine" => engine.name()).increment(1);
                    return TranslationOutcome::Translated(masked.restore(&out));
                }
                Err(e) => {
                    counter!("relay_translation_failures_total", "engine" => engine.name())
                        .increment(1);
                    tracing::warn!(engine = engine.name(), "translation failed: {e:#}");
                }
            }
        }
        TranslationOutcome::AllFailed
    }

    /// Chain result flattened for rendering.
    pub async fn translate_or_sentinel(&self, text: &str) -> String {
        match self.translate(text).await {
            TranslationOutcome::Translated(t) => t,
            TranslationOutcome::AllFailed => TRANSLATION_UNAVAILABLE.to_string(),
        }
    }
}

/// Builds the chain in configured priority order, skipping engines whose
/// credentials are absent. MyMemory is keyless and always eligible.
pub fn build_chain(settings: &Settings) -> Vec<Box<dyn TranslateEngine>> {
    let mut chain: Vec<Box<dyn TranslateEngine>> = Vec::new();
    for name in &settings.engine_order {
        match name.as_str() {
            "openai" => {
                if let Some(key) = &settings.openai_api_key {
                    chain.push(Box::new(OpenAiEngine::new(
                        key,
                        &settings.openai_model,
                        &settings.source_lang,
                        &settings.target_lang,
                    )));
                } else {
                    tracing::debug!("openai engine skipped, no api key");
                }
            }
            "mymemory" => {
                chain.push(Box::new(MyMemoryEngine::new(
                    &settings.source_lang,
                    &settings.target_lang,
                    settings.mymemory_chunk_limit,
                )));
            }
            "microsoft" => {
                if let (Some(key), Some(region)) = (
                    &settings.ms_translator_key,
                    &settings.ms_translator_region,
                ) {
                    chain.push(Box::new(MicrosoftEngine::new(
                        key,
                        region,
                        &settings.source_lang,
                        &settings.target_lang,
                    )));
                } else {
                    tracing::debug!("microsoft engine skipped, key or region missing");
                }
            }
            "deepl" => {
                if let Some(key) = &settings.deepl_api_key {
                    chain.push(Box::new(DeepLEngine::new(key, &settings.target_lang)));
                } else {
                    tracing::debug!("deepl engine skipped, no api key");
                }
            }
            other => tracing::warn!(engine = other, "unknown translation engine, skipped"),
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct Identity;

    #[async_trait]
    impl TranslateEngine for Identity {
        fn name(&self) -> &'static str {
            "identity"
        }
        async fn translate(&self, text: &str) -> Result<String> {
            Ok(text.to_string())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl TranslateEngine for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }
        async fn translate(&self, _text: &str) -> Result<String> {
            bail!("nope")
        }
    }

    /// Lowercases everything, which corrupts placeholder casing the way some
    /// real engines do.
    struct Lowercasing;

    #[async_trait]
    impl TranslateEngine for Lowercasing {
        fn name(&self) -> &'static str {
            "lowercasing"
        }
        async fn translate(&self, text: &str) -> Result<String> {
            Ok(text.to_lowercase())
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let t = Translator::new(vec![
            Box::new(AlwaysFails),
            Box::new(Identity),
            Box::new(AlwaysFails),
        ]);
        match t.translate("hello 🚀 world").await {
            TranslationOutcome::Translated(out) => assert!(out.contains('🚀')),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_chain_reports_all_failed() {
        let t = Translator::new(vec![Box::new(AlwaysFails), Box::new(AlwaysFails)]);
        assert_eq!(
            t.translate("hello").await,
            TranslationOutcome::AllFailed
        );
        assert_eq!(
            t.translate_or_sentinel("hello").await,
            TRANSLATION_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn spans_survive_a_case_corrupting_engine() {
        let t = Translator::new(vec![Box::new(Lowercasing)]);
        let text = "Breaking 🚀 read https://Example.com/Path now";
        match t.translate(text).await {
            TranslationOutcome::Translated(out) => {
                assert!(out.contains('🚀'));
                // Original URL casing restored even though the engine
                // lowercased the whole string.
                assert!(out.contains("https://Example.com/Path"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_chain_fails_closed() {
        let t = Translator::new(Vec::new());
        assert_eq!(t.translate("x").await, TranslationOutcome::AllFailed);
    }
}
