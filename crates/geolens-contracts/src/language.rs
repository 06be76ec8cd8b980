/// Answer language used when none is configured.
pub const DEFAULT_LANGUAGE: &str = "Azerbaijani";

pub fn is_azerbaijani(language: &str) -> bool {
    language.trim().eq_ignore_ascii_case(DEFAULT_LANGUAGE)
}

/// Title shown for a grounding source the service left untitled.
pub fn source_title_for_language(language: &str) -> &'static str {
    if is_azerbaijani(language) {
        "Geoloji Mənbə"
    } else {
        "Geological source"
    }
}
