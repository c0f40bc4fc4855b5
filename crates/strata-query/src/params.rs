//! Per-request query parameters
//!
//! These come from the request rather than the expression: preferred
//! languages, push mode, back-ref expansion and URI prioritisation.

use strata_core::QueryDefaults;
use strata_schema::dtype::TextType;
use strata_schema::{Access, PropId};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    /// Languages asked for with `lang(...)`; `*` means all
    pub lang: Vec<String>,
    /// Configured language fallback order
    pub default_langs: Vec<String>,
    /// Push mode selects every language of a text
    pub push: bool,
    /// `None`: nothing expanded; `Some([])`: everything; otherwise the
    /// listed property places
    pub expand: Option<Vec<String>>,
    pub prioritize_uri: bool,
    pub file_blocks: bool,
    /// Lowest access level `select()` includes
    pub access: Access,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self::from(&QueryDefaults::default())
    }
}

impl From<&QueryDefaults> for QueryParams {
    fn from(defaults: &QueryDefaults) -> Self {
        Self {
            lang: Vec::new(),
            default_langs: defaults.default_langs.clone(),
            push: false,
            expand: None,
            prioritize_uri: defaults.prioritize_uri,
            file_blocks: defaults.file_blocks,
            access: Access::Public,
        }
    }
}

impl QueryParams {
    pub fn with_lang<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lang = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expand(mut self, expand: Option<Vec<String>>) -> Self {
        self.expand = expand;
        self
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    pub fn is_expanded(&self, place: &str) -> bool {
        match &self.expand {
            None => false,
            Some(places) => places.is_empty() || places.iter().any(|p| p == place),
        }
    }

    /// Languages of a text to select and whether the result collapses into
    /// a single string.
    ///
    /// Order of precedence: push mode, explicit `lang()`, configured
    /// defaults, first declared language.
    pub fn choose_langs(&self, text: &TextType) -> (Vec<(String, PropId)>, bool) {
        if self.push || self.lang.iter().any(|l| l == "*") {
            return (text.langs.clone(), false);
        }
        if !self.lang.is_empty() {
            let chosen = self
                .lang
                .iter()
                .filter_map(|lang| text.lang(lang).map(|id| (lang.clone(), id)))
                .collect();
            return (chosen, false);
        }
        let defaults: Vec<(String, PropId)> = self
            .default_langs
            .iter()
            .filter_map(|lang| text.lang(lang).map(|id| (lang.clone(), id)))
            .collect();
        if !defaults.is_empty() {
            return (defaults, true);
        }
        (text.langs.iter().take(1).cloned().collect(), true)
    }
}
