//! Language Detection
//!
//! Override chain: explicit metadata > `CONTEXT_ORCHESTRATOR_LANG_OVERRIDE`
//! environment variable > script heuristic > configured default. The result
//! selects the summary prompt and decides whether summarisation may stay
//! local or routes through the external reasoner.

use crate::config::{env_language_override, LanguageConfig};

/// Detected or overridden language, with where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageSource {
    Explicit,
    Environment,
    Heuristic,
    Default,
}

/// Resolves the language of a conversation.
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    config: LanguageConfig,
}

impl LanguageDetector {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }

    /// Resolve the language code for a piece of content.
    pub fn resolve(&self, explicit: Option<&str>, content: &str) -> (String, LanguageSource) {
        if let Some(lang) = explicit.map(str::trim).filter(|l| !l.is_empty()) {
            return (lang.to_lowercase(), LanguageSource::Explicit);
        }
        if let Some(lang) = env_language_override() {
            return (lang, LanguageSource::Environment);
        }
        if let Some(lang) = script_heuristic(content) {
            return (lang.to_string(), LanguageSource::Heuristic);
        }
        (
            self.config.default_language.clone(),
            LanguageSource::Default,
        )
    }

    /// Whether the local summariser handles this language natively.
    pub fn supported_locally(&self, language: &str) -> bool {
        self.config
            .supported_local
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language))
    }

    /// Whether unsupported languages should route to the external reasoner.
    pub fn fallback_external(&self) -> bool {
        self.config.fallback_strategy == "external"
    }
}

/// Cheap script-range heuristic. Only claims a language when a non-Latin
/// script clearly dominates; Latin text returns `None` and falls through to
/// the configured default.
fn script_heuristic(content: &str) -> Option<&'static str> {
    let mut cjk = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut cyrillic = 0usize;
    let mut letters = 0usize;

    for c in content.chars().take(2000) {
        if !c.is_alphabetic() {
            continue;
        }
        letters += 1;
        match c as u32 {
            0x4E00..=0x9FFF => cjk += 1,
            0x3040..=0x30FF => kana += 1,
            0xAC00..=0xD7AF => hangul += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ => {}
        }
    }
    if letters == 0 {
        return None;
    }
    let dominant = letters / 4;
    if kana > dominant.min(letters / 10) && kana > 0 {
        // Any meaningful kana presence means Japanese even in mixed text
        return Some("ja");
    }
    if cjk > dominant {
        return Some("zh");
    }
    if hangul > dominant {
        return Some("ko");
    }
    if cyrillic > dominant {
        return Some("ru");
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LanguageDetector {
        LanguageDetector::new(LanguageConfig::default())
    }

    #[test]
    fn explicit_wins() {
        let (lang, source) = detector().resolve(Some("DE"), "総理大臣");
        assert_eq!(lang, "de");
        assert_eq!(source, LanguageSource::Explicit);
    }

    #[test]
    fn latin_text_defaults() {
        let (lang, source) = detector().resolve(None, "fix the build pipeline");
        assert_eq!(lang, "en");
        assert_eq!(source, LanguageSource::Default);
    }

    #[test]
    fn cjk_detected() {
        let (lang, source) = detector().resolve(None, "数据库迁移失败，需要回滚到上一个版本");
        assert_eq!(lang, "zh");
        assert_eq!(source, LanguageSource::Heuristic);
    }

    #[test]
    fn japanese_kana_detected() {
        let (lang, _) = detector().resolve(None, "デプロイが失敗しました。ログを確認してください。");
        assert_eq!(lang, "ja");
    }

    #[test]
    fn cyrillic_detected() {
        let (lang, _) = detector().resolve(None, "не удалось подключиться к базе данных");
        assert_eq!(lang, "ru");
    }

    #[test]
    fn local_support_check() {
        let d = detector();
        assert!(d.supported_locally("en"));
        assert!(d.supported_locally("EN"));
        assert!(!d.supported_locally("ja"));
        assert!(d.fallback_external());
    }
}
