use crate::{
    library::ModInfo,
    steam::{FileDetails, MetadataProvider},
};
use std::sync::Arc;
use tracing::{debug, warn};

const RESULT_OK: i64 = 1;

/// Turns provider answers into a complete [`ModInfo`]. Never fails: problems
/// end up in `ModInfo::error` with a synthesized title.
pub struct MetadataResolver {
    provider: Arc<dyn MetadataProvider>,
}

impl MetadataResolver {
    pub fn new(provider: Arc<dyn MetadataProvider>) -> Self {
        Self { provider }
    }

    pub fn resolve(&self, id: &str) -> ModInfo {
        let details = match self.provider.fetch_details(id) {
            Ok(details) => details,
            Err(err) => {
                debug!(mod_id = id, error = %err, "details request failed");
                return ModInfo::failed(id, err.to_string());
            }
        };
        if details.result_code != RESULT_OK {
            return ModInfo::failed(
                id,
                format!("API result not OK (result code: {})", details.result_code),
            );
        }

        let dependencies = match self.provider.fetch_dependency_ids(id) {
            Ok(ids) => ids.into_iter().filter(|dep| dep != id).collect(),
            Err(err) => {
                warn!(mod_id = id, error = %err, "could not read required items");
                Vec::new()
            }
        };

        info_from_details(details, dependencies)
    }

    /// Description text alone, or `None` when it cannot be obtained.
    pub fn resolve_description_only(&self, id: &str) -> Option<String> {
        match self.provider.fetch_details(id) {
            Ok(details) if details.result_code == RESULT_OK => details
                .description
                .map(|raw| unescape_html(&raw))
                .filter(|text| !text.trim().is_empty()),
            Ok(details) => {
                debug!(mod_id = id, result = details.result_code, "description lookup rejected");
                None
            }
            Err(err) => {
                debug!(mod_id = id, error = %err, "description lookup failed");
                None
            }
        }
    }
}

fn info_from_details(details: FileDetails, dependencies: Vec<String>) -> ModInfo {
    ModInfo {
        title: details
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        app_id: details.app_id,
        file_size: details.file_size,
        description: details
            .description
            .map(|raw| unescape_html(&raw))
            .unwrap_or_default(),
        preview_url: details.preview_url.unwrap_or_default(),
        dependencies,
        error: None,
    }
}

/// Decodes HTML entities one by one; bare ampersands and unknown names are
/// kept as written.
pub fn unescape_html(raw: &str) -> String {
    html_escape::decode_html_entities(raw).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::steam::ProviderError;
    use std::{collections::HashMap, sync::Mutex};

    /// In-memory provider keyed by id.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub details: Mutex<HashMap<String, FileDetails>>,
        pub dependencies: Mutex<HashMap<String, Vec<String>>>,
        pub scrape_fails: bool,
    }

    impl FakeProvider {
        pub fn with_mod(self, id: &str, title: &str, app_id: u64, deps: &[&str]) -> Self {
            self.details.lock().unwrap().insert(
                id.to_string(),
                FileDetails {
                    result_code: 1,
                    title: Some(title.to_string()),
                    app_id: Some(app_id),
                    file_size: 2048,
                    description: Some(format!("[b]{title}[/b] &amp; more")),
                    preview_url: None,
                },
            );
            self.dependencies
                .lock()
                .unwrap()
                .insert(id.to_string(), deps.iter().map(|dep| dep.to_string()).collect());
            self
        }
    }

    impl MetadataProvider for FakeProvider {
        fn fetch_details(&self, id: &str) -> Result<FileDetails, ProviderError> {
            self.details
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(ProviderError::MissingDetails)
        }

        fn fetch_dependency_ids(&self, id: &str) -> Result<Vec<String>, ProviderError> {
            if self.scrape_fails {
                return Err(ProviderError::Network("connection reset".to_string()));
            }
            Ok(self
                .dependencies
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn resolver(provider: FakeProvider) -> MetadataResolver {
        MetadataResolver::new(Arc::new(provider))
    }

    #[test]
    fn successful_lookup_fills_every_field() {
        let resolver = resolver(FakeProvider::default().with_mod("1", "One", 294100, &["2", "1"]));
        let info = resolver.resolve("1");
        assert_eq!(info.title, "One");
        assert_eq!(info.app_id, Some(294100));
        assert_eq!(info.file_size, 2048);
        assert_eq!(info.description, "[b]One[/b] & more");
        assert_eq!(info.dependencies, vec!["2".to_string()]);
        assert!(info.error.is_none());
    }

    #[test]
    fn missing_details_produce_placeholder_title_and_error() {
        let info = resolver(FakeProvider::default()).resolve("77");
        assert_eq!(info.title, "Mod 77");
        assert_eq!(info.error.as_deref(), Some("No details in API response."));
        assert!(info.dependencies.is_empty());
    }

    #[test]
    fn non_success_result_code_is_reported() {
        let provider = FakeProvider::default().with_mod("9", "Nine", 1, &[]);
        provider.details.lock().unwrap().get_mut("9").unwrap().result_code = 9;
        let info = resolver(provider).resolve("9");
        assert_eq!(info.error.as_deref(), Some("API result not OK (result code: 9)"));
        assert_eq!(info.title, "Mod 9");
    }

    #[test]
    fn scrape_failure_keeps_details() {
        let provider = FakeProvider {
            scrape_fails: true,
            ..FakeProvider::default()
        }
        .with_mod("3", "Three", 10, &["4"]);
        let info = resolver(provider).resolve("3");
        assert_eq!(info.title, "Three");
        assert!(info.dependencies.is_empty());
        assert!(info.error.is_none());
    }

    #[test]
    fn blank_title_falls_back_to_unknown() {
        let provider = FakeProvider::default().with_mod("5", "  ", 10, &[]);
        assert_eq!(resolver(provider).resolve("5").title, "Unknown");
    }

    #[test]
    fn description_only_lookup() {
        let resolver = resolver(FakeProvider::default().with_mod("6", "Six", 10, &[]));
        assert_eq!(
            resolver.resolve_description_only("6").as_deref(),
            Some("[b]Six[/b] & more")
        );
        assert_eq!(resolver.resolve_description_only("missing"), None);
    }

    #[test]
    fn malformed_entities_leave_text_untouched() {
        assert_eq!(unescape_html("Fish &amp; Chips"), "Fish & Chips");
        assert_eq!(unescape_html("&#65;&#x42;"), "AB");
        assert_eq!(unescape_html("5 & 6"), "5 & 6");
    }

    #[test]
    fn bare_ampersands_do_not_block_other_entities() {
        assert_eq!(
            unescape_html("Tom &amp; Jerry & friends &quot;fun&quot;"),
            "Tom & Jerry & friends \"fun\""
        );
        assert_eq!(unescape_html("It&rsquo;s &amp; more"), "It\u{2019}s & more");
        assert_eq!(unescape_html("caf&eacute; &bogus; &lt;b&gt;"), "caf\u{e9} &bogus; <b>");
    }
}
