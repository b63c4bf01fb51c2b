/// Language tag used when the platform does not report a locale.
pub const DEFAULT_LANGUAGE: &str = "en-US";

pub fn detect_language() -> String {
    normalize_language(sys_locale::get_locale())
}

fn normalize_language(locale: Option<String>) -> String {
    locale
        .map(|locale| {
            // POSIX locales carry an encoding and modifier suffix (`de_DE.UTF-8@euro`).
            let tag = locale.split(['.', '@']).next().unwrap_or_default();
            tag.trim().to_string()
        })
        .filter(|tag| !tag.is_empty() && tag != "C" && tag != "POSIX")
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}
